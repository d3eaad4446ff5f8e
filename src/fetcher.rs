use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use tracing::debug;

use crate::error::{GatorError, Result};

/// An RSS 2.0 document: `<rss><channel>...</channel></rss>`.
#[derive(Debug, Clone)]
pub struct RssFeed {
    pub channel: RssChannel,
}

#[derive(Debug, Clone, Default)]
pub struct RssChannel {
    pub title: String,
    pub link: String,
    pub description: String,
    pub items: Vec<RssItem>,
}

#[derive(Debug, Clone, Default)]
pub struct RssItem {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Raw `pubDate` text; parsed during ingestion.
    pub pub_date: String,
}

pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder().user_agent("gator").build()?;
        Ok(Self { client })
    }

    /// One GET per call, no retries. Non-2xx responses are network errors.
    pub async fn fetch_feed(&self, url: &str) -> Result<RssFeed> {
        debug!(url, "fetching feed");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatorError::Network(format!(
                "{} returned HTTP {}",
                url, status
            )));
        }

        let body = response.text().await?;
        parse_feed(&body)
    }
}

/// Parses an RSS 2.0 document.
///
/// Only unprefixed elements are read, so extension elements such as
/// `<media:title>` or `<atom:link>` next to their RSS counterparts are ignored.
/// Unknown elements are skipped at any depth.
pub fn parse_feed(xml: &str) -> Result<RssFeed> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut channel: Option<RssChannel> = None;
    let mut path: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                path.push(element_name(e.name().as_ref())?);
                open_element(&path, &mut channel);
            }
            Event::Empty(e) => {
                path.push(element_name(e.name().as_ref())?);
                open_element(&path, &mut channel);
                path.pop();
            }
            Event::End(_) => {
                path.pop();
            }
            Event::Text(e) => {
                let text = e.unescape()?;
                append_text(&path, &mut channel, &text);
            }
            Event::CData(e) => {
                let text = std::str::from_utf8(&e).map_err(|e| GatorError::Parse(e.to_string()))?;
                append_text(&path, &mut channel, text);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !path.is_empty() {
        return Err(GatorError::Parse(format!(
            "unexpected end of document inside <{}>",
            path.join(">, <")
        )));
    }

    channel
        .map(|channel| RssFeed { channel })
        .ok_or_else(|| GatorError::Parse("document has no <rss><channel> element".to_string()))
}

fn element_name(raw: &[u8]) -> Result<String> {
    std::str::from_utf8(raw)
        .map(str::to_string)
        .map_err(|e| GatorError::Parse(e.to_string()))
}

fn open_element(path: &[String], channel: &mut Option<RssChannel>) {
    let names: Vec<&str> = path.iter().map(String::as_str).collect();
    match names.as_slice() {
        ["rss", "channel"] => {
            channel.get_or_insert_with(RssChannel::default);
        }
        ["rss", "channel", "item"] => {
            if let Some(channel) = channel {
                channel.items.push(RssItem::default());
            }
        }
        _ => {}
    }
}

fn append_text(path: &[String], channel: &mut Option<RssChannel>, text: &str) {
    let Some(channel) = channel else {
        return;
    };
    let names: Vec<&str> = path.iter().map(String::as_str).collect();
    if let Some(target) = text_target(&names, channel) {
        target.push_str(text);
    }
}

/// The field that character data at `path` belongs to, if any.
fn text_target<'a>(path: &[&str], channel: &'a mut RssChannel) -> Option<&'a mut String> {
    match path {
        ["rss", "channel", "title"] => Some(&mut channel.title),
        ["rss", "channel", "link"] => Some(&mut channel.link),
        ["rss", "channel", "description"] => Some(&mut channel.description),
        ["rss", "channel", "item", field] => {
            let item = channel.items.last_mut()?;
            match *field {
                "title" => Some(&mut item.title),
                "link" => Some(&mut item.link),
                "description" => Some(&mut item.description),
                "pubDate" => Some(&mut item.pub_date),
                _ => None,
            }
        }
        _ => None,
    }
}

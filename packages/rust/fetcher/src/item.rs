//! Provider dataset items and their conversion into [`Record`]s.

use leadscore_shared::{Identifier, Record};
use serde::{Deserialize, Deserializer};
use tracing::warn;

/// One item of the profile scraper's dataset (camelCase on the wire).
///
/// Unknown fields are ignored. Items that describe a failed lookup carry an
/// `error` key instead of profile data.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileItem {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub biography: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub external_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub external_urls: Vec<ExternalUrl>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub latest_posts: Vec<Post>,
    #[serde(default)]
    pub followers_count: Option<u64>,
    #[serde(default)]
    pub private: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The scraper sends `null` for lists it could not collect.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// `externalUrls` entries come either as bare strings or as link objects.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ExternalUrl {
    Plain(String),
    Link {
        url: String,
        #[serde(default)]
        title: Option<String>,
    },
}

impl ExternalUrl {
    pub fn url(&self) -> &str {
        match self {
            Self::Plain(url) => url,
            Self::Link { url, .. } => url,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Post {
    #[serde(default)]
    pub caption: Option<String>,
}

impl ProfileItem {
    /// Convert into a record. Error items and items without a usable
    /// username yield `None`.
    pub fn into_record(self) -> Option<Record> {
        if self.error.is_some() {
            return None;
        }
        let identifier = Identifier::parse(self.username.as_deref()?)?;

        let mut external_urls: Vec<String> = self
            .external_urls
            .iter()
            .map(|u| u.url().trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if let Some(url) = self.external_url.map(|u| u.trim().to_string()) {
            if !url.is_empty() && !external_urls.contains(&url) {
                external_urls.push(url);
            }
        }

        Some(Record {
            identifier,
            full_name: self.full_name.unwrap_or_default(),
            biography: self.biography.unwrap_or_default(),
            location: self.location.unwrap_or_default(),
            captions: self
                .latest_posts
                .into_iter()
                .map(|p| p.caption.unwrap_or_default())
                .collect(),
            external_urls,
            followers_count: self.followers_count,
            is_private: self.private,
        })
    }
}

/// Convert a dataset page into records, one item at a time.
///
/// Error items are skipped silently. Items that do not match the expected
/// shape are skipped with a warning; the rest of the page is kept.
pub fn records_from_page(items: Vec<serde_json::Value>) -> Vec<Record> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(position, value)| {
            match serde_json::from_value::<ProfileItem>(value) {
                Ok(item) => item.into_record(),
                Err(e) => {
                    warn!(position, error = %e, "malformed dataset item, skipping");
                    None
                }
            }
        })
        .collect()
}

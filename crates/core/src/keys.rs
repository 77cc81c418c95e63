//! Item key, variant and file name derivation.
//!
//! Every cached resource is identified by an [`ItemKey`] plus an optional
//! variant (image size tier, language variant). The pair is hashed into a
//! content-addressed [`UniqueKey`] that names the content file on disk; the
//! serialized headers live next to it under `<name>__Header`.
//!
//! The digest is lower-case hex SHA-256 over the NFC form of `key` or
//! `key__variant`. Existing stores depend on this exact format.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;
use url::Url;

use crate::fetch::FetchRequest;

/// Stable identity of a cacheable resource.
pub type ItemKey = String;

/// Identity of a logical caching unit.
pub type GroupKey = String;

/// Content-addressed file name of one item variant.
pub type UniqueKey = String;

/// Request header that tags a request with its [`PersistItemType`].
pub const PERSIST_ITEM_TYPE_HEADER: &str = "Persistent-Cache-Item-Type";

/// Suffix of the file holding serialized response headers.
pub const HEADER_FILE_SUFFIX: &str = "__Header";

static SIZE_PREFIX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(?:(?:lossy-|lossless-)?page\d+-)?(\d+)px-").ok());

/// How a request's item key and variant are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PersistItemType {
    Article,
    Image,
    ImageInfo,
}

impl PersistItemType {
    pub fn as_header_value(self) -> &'static str {
        match self {
            PersistItemType::Article => "Article",
            PersistItemType::Image => "Image",
            PersistItemType::ImageInfo => "ImageInfo",
        }
    }

    pub fn from_header_value(value: &str) -> Option<Self> {
        match value {
            "Article" => Some(PersistItemType::Article),
            "Image" => Some(PersistItemType::Image),
            "ImageInfo" => Some(PersistItemType::ImageInfo),
            _ => None,
        }
    }
}

/// Identity of one item variant. Equality ignores the origin URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKeyAndVariant {
    pub key: ItemKey,
    pub variant: Option<String>,
}

impl ItemKeyAndVariant {
    pub fn new(key: impl Into<ItemKey>, variant: Option<String>) -> Self {
        Self { key: key.into(), variant }
    }

    pub fn unique_file_name(&self) -> UniqueKey {
        unique_file_name(&self.key, self.variant.as_deref())
    }

    pub fn unique_header_file_name(&self) -> String {
        header_file_name(&self.unique_file_name())
    }
}

impl fmt::Display for ItemKeyAndVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant {
            Some(variant) => write!(f, "{}__{}", self.key, variant),
            None => f.write_str(&self.key),
        }
    }
}

fn nfc(s: &str) -> String {
    s.nfc().collect()
}

/// Derive the content file name for a key and optional variant.
pub fn unique_file_name(key: &str, variant: Option<&str>) -> UniqueKey {
    let name = match variant {
        Some(variant) => nfc(&format!("{key}__{variant}")),
        None => nfc(key),
    };

    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hex::encode(hasher.finalize())
}

/// Header file name paired with a content file name.
pub fn header_file_name(unique_file_name: &str) -> String {
    format!("{unique_file_name}{HEADER_FILE_SUFFIX}")
}

/// Database key of an article: https scheme, lower-cased host, no query or fragment.
pub fn article_database_key(url: &Url) -> Option<ItemKey> {
    let host = url.host_str()?.to_lowercase();
    Some(nfc(&format!("https://{host}{}", url.path())))
}

/// File name of an image, taken from the original-file segment of thumbnail URLs.
pub fn image_name(url: &Url) -> Option<String> {
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    let last = *segments.last()?;

    if let Some(thumb) = segments.iter().position(|s| *s == "thumb")
        && segments.len() > thumb + 4
    {
        return Some(segments[thumb + 3].to_string());
    }

    if let Some(caps) = SIZE_PREFIX.as_ref().and_then(|re| re.captures(last))
        && let Some(prefix) = caps.get(0)
    {
        let rest = &last[prefix.end()..];
        if !rest.is_empty() {
            return Some(rest.to_string());
        }
    }

    Some(last.to_string())
}

/// Thumbnail width encoded in the last path segment (`220px-Cat.jpg` → 220).
pub fn image_size_prefix(url: &Url) -> Option<u64> {
    let last = url.path_segments()?.filter(|s| !s.is_empty()).next_back()?;
    SIZE_PREFIX
        .as_ref()?
        .captures(last)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Language subdomain of a wiki host (`zh.wikipedia.org` → `zh`).
pub fn language_code(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let mut labels = host.split('.');
    let first = labels.next()?;
    if labels.count() < 2 || first.eq_ignore_ascii_case("www") || first.eq_ignore_ascii_case("m") {
        return None;
    }
    Some(first.to_lowercase())
}

/// Maps URLs to item keys, variants and unique file names per item type.
#[derive(Debug, Clone, Default)]
pub struct KeyDeriver {
    language_variants: BTreeMap<String, String>,
}

impl KeyDeriver {
    pub fn new(language_variants: BTreeMap<String, String>) -> Self {
        Self { language_variants }
    }

    pub fn from_config(config: &crate::config::AppConfig) -> Self {
        Self::new(config.language_variants.clone())
    }

    pub fn item_key(&self, url: &Url, item_type: PersistItemType) -> Option<ItemKey> {
        match item_type {
            PersistItemType::Image => {
                let key = match (url.host_str(), image_name(url)) {
                    (Some(host), Some(name)) => format!("{host}__{name}"),
                    _ => url.as_str().to_string(),
                };
                Some(nfc(&key))
            }
            PersistItemType::Article => article_database_key(url),
            PersistItemType::ImageInfo => Some(nfc(url.as_str())),
        }
    }

    pub fn variant(&self, url: &Url, item_type: PersistItemType) -> Option<String> {
        match item_type {
            PersistItemType::Image => image_size_prefix(url).map(|size| size.to_string()),
            PersistItemType::Article => self.preferred_language_variant(url),
            PersistItemType::ImageInfo => None,
        }
    }

    /// Configured language variant for the URL's language subdomain.
    pub fn preferred_language_variant(&self, url: &Url) -> Option<String> {
        let code = language_code(url)?;
        self.language_variants.get(&code).cloned()
    }

    pub fn item_key_and_variant(&self, url: &Url, item_type: PersistItemType) -> Option<ItemKeyAndVariant> {
        let key = self.item_key(url, item_type)?;
        Some(ItemKeyAndVariant { key, variant: self.variant(url, item_type) })
    }

    /// Key and variant of a tagged request. Untagged requests have no key.
    pub fn request_key(&self, request: &FetchRequest) -> Option<ItemKeyAndVariant> {
        self.item_key_and_variant(&request.url, request.item_type?)
    }

    pub fn unique_file_name_for_request(&self, request: &FetchRequest) -> Option<UniqueKey> {
        self.request_key(request).map(|k| k.unique_file_name())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const UNKNOWN_AUTHOR: &str = "Unknown Author";
pub const NO_DESCRIPTION: &str = "No description available";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Image,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Author {
    pub avatar: Option<String>,
    pub nickname: String,
}

/// Provider-independent description of one TikTok post and its media links.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalMedia {
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub author: Author,
    pub desc: String,
    #[serde(rename = "videoSD")]
    pub video_sd: Option<String>,
    #[serde(rename = "videoHD")]
    pub video_hd: Option<String>,
    pub video_watermark: Option<String>,
    pub music: Option<String>,
    pub images: Option<Vec<String>>,
    pub upload_date: Option<DateTime<Utc>>,
}

impl CanonicalMedia {
    /// At least one video, audio or image link is present.
    pub fn is_deliverable(&self) -> bool {
        self.video_sd.is_some()
            || self.video_hd.is_some()
            || self.video_watermark.is_some()
            || self.music.is_some()
            || self.images.as_ref().is_some_and(|images| !images.is_empty())
    }

    /// Preferred link for streaming: HD, then SD, then the watermarked copy.
    pub fn best_video(&self) -> Option<&str> {
        self.video_hd
            .as_deref()
            .or(self.video_sd.as_deref())
            .or(self.video_watermark.as_deref())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalResult {
    pub status: ResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CanonicalMedia>,
}

impl CanonicalResult {
    pub fn success(media: CanonicalMedia) -> Self {
        Self {
            status: ResultStatus::Success,
            result: Some(media),
        }
    }
}

/// First candidate that is present and not blank.
pub(crate) fn first_link<'a>(
    candidates: impl IntoIterator<Item = Option<&'a String>>,
) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .map(ToString::to_string)
}

pub(crate) fn non_empty_images(images: Option<Vec<String>>) -> Option<Vec<String>> {
    images
        .map(|images| {
            images
                .into_iter()
                .filter(|image| !image.trim().is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|images| !images.is_empty())
}

pub(crate) fn timestamp_from_seconds(seconds: Option<i64>) -> Option<DateTime<Utc>> {
    seconds
        .filter(|value| *value > 0)
        .and_then(|value| DateTime::from_timestamp(value, 0))
}

pub(crate) fn media_type_for(declared: Option<&str>, images: Option<&Vec<String>>) -> MediaType {
    match declared {
        Some("image") => MediaType::Image,
        Some("video") => MediaType::Video,
        _ if images.is_some_and(|images| !images.is_empty()) => MediaType::Image,
        _ => MediaType::Video,
    }
}

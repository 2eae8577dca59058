//! Response shapes returned by the upstream providers.
//!
//! Every provider speaks its own JSON dialect. They are decoded into one of the
//! [`UpstreamResponse`] variants and narrowed into [`CanonicalMedia`] here, so
//! nothing past this module has to know which provider answered.

use serde::{Deserialize, Deserializer};

use crate::canonical::{
    Author, CanonicalMedia, NO_DESCRIPTION, UNKNOWN_AUTHOR, first_link, media_type_for,
    non_empty_images, timestamp_from_seconds,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LibraryVersion {
    V1,
    V2,
    V3,
}

impl LibraryVersion {
    pub const ALL: [LibraryVersion; 3] = [Self::V1, Self::V2, Self::V3];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
            Self::V3 => "v3",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "v1" => Some(Self::V1),
            "v2" => Some(Self::V2),
            "v3" => Some(Self::V3),
            _ => None,
        }
    }
}

/// Envelope shared by all downloader-library versions.
#[derive(Debug, Deserialize)]
pub struct LibraryEnvelope {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

/// Library v1: TikTok's own API payload.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TiktokApiResult {
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub create_time: Option<i64>,
    pub desc: Option<String>,
    pub author: Option<TiktokApiAuthor>,
    pub video: Option<TiktokApiVideo>,
    pub images: Option<Vec<String>>,
    pub music: Option<TiktokApiMusic>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TiktokApiAuthor {
    pub username: Option<String>,
    pub nickname: Option<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub avatar_thumb: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub avatar_medium: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TiktokApiVideo {
    #[serde(deserialize_with = "null_as_empty")]
    pub download_addr: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub play_addr: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TiktokApiMusic {
    #[serde(deserialize_with = "null_as_empty")]
    pub play_url: Vec<String>,
}

/// The TikTok API sends `null` instead of an empty list for absent link sets.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Option<String>>>::deserialize(deserializer)?
        .unwrap_or_default()
        .into_iter()
        .flatten()
        .collect())
}

/// Library v2: SSSTik scrape.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SsstikResult {
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub desc: Option<String>,
    pub author: Option<SimpleAuthor>,
    pub video: Option<SsstikVideo>,
    pub images: Option<Vec<String>>,
    pub music: Option<SsstikMusic>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SsstikVideo {
    pub play_addr: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SsstikMusic {
    pub play_url: Option<String>,
}

/// Library v3: MusicalDown scrape.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MusicalDownResult {
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub desc: Option<String>,
    pub author: Option<SimpleAuthor>,
    #[serde(rename = "videoHD")]
    pub video_hd: Option<String>,
    pub video_watermark: Option<String>,
    pub images: Option<Vec<String>>,
    pub music: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SimpleAuthor {
    pub avatar: Option<String>,
    pub nickname: Option<String>,
}

/// Envelope of the TikWM public mirror. `code == 0` means success.
#[derive(Debug, Deserialize)]
pub struct TikWmEnvelope {
    pub code: i64,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Option<TikWmData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TikWmData {
    pub title: Option<String>,
    pub play: Option<String>,
    pub hdplay: Option<String>,
    pub wmplay: Option<String>,
    pub music: Option<String>,
    pub create_time: Option<i64>,
    pub images: Option<Vec<String>>,
    pub author: Option<TikWmAuthor>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TikWmAuthor {
    pub unique_id: Option<String>,
    pub nickname: Option<String>,
    pub avatar: Option<String>,
}

/// One decoded provider payload, tagged by the dialect it was written in.
#[derive(Debug)]
pub enum UpstreamResponse {
    TiktokApi(TiktokApiResult),
    Ssstik(SsstikResult),
    MusicalDown(MusicalDownResult),
    TikWm(TikWmData),
}

impl UpstreamResponse {
    pub fn from_library(
        version: LibraryVersion,
        result: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match version {
            LibraryVersion::V1 => Self::TiktokApi(serde_json::from_value(result)?),
            LibraryVersion::V2 => Self::Ssstik(serde_json::from_value(result)?),
            LibraryVersion::V3 => Self::MusicalDown(serde_json::from_value(result)?),
        })
    }

    pub fn into_canonical(self) -> CanonicalMedia {
        match self {
            Self::TiktokApi(result) => tiktok_api_to_canonical(result),
            Self::Ssstik(result) => ssstik_to_canonical(result),
            Self::MusicalDown(result) => musical_down_to_canonical(result),
            Self::TikWm(data) => tikwm_to_canonical(data),
        }
    }
}

fn tiktok_api_to_canonical(result: TiktokApiResult) -> CanonicalMedia {
    let author = result.author.unwrap_or_default();
    let video = result.video.unwrap_or_default();
    let music = result.music.unwrap_or_default();
    let images = non_empty_images(result.images);

    CanonicalMedia {
        media_type: media_type_for(result.media_type.as_deref(), images.as_ref()),
        author: Author {
            avatar: first_link([
                author.avatar_thumb.first(),
                author.avatar_medium.first(),
            ]),
            nickname: first_link([author.nickname.as_ref(), author.username.as_ref()])
                .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
        },
        desc: describe(result.desc),
        video_sd: first_link([video.download_addr.first(), video.play_addr.first()]),
        video_hd: first_link([
            video.download_addr.get(1),
            video.download_addr.first(),
            video.play_addr.get(1),
            video.play_addr.first(),
        ]),
        video_watermark: first_link([video.play_addr.first()]),
        music: first_link([music.play_url.first()]),
        images,
        upload_date: timestamp_from_seconds(result.create_time),
    }
}

fn ssstik_to_canonical(result: SsstikResult) -> CanonicalMedia {
    let author = result.author.unwrap_or_default();
    let play = result
        .video
        .and_then(|video| first_link([video.play_addr.as_ref()]));
    let images = non_empty_images(result.images);

    CanonicalMedia {
        media_type: media_type_for(result.media_type.as_deref(), images.as_ref()),
        author: simple_author(author),
        desc: describe(result.desc),
        video_sd: play.clone(),
        video_hd: play.clone(),
        video_watermark: play,
        music: result
            .music
            .and_then(|music| first_link([music.play_url.as_ref()])),
        images,
        upload_date: None,
    }
}

fn musical_down_to_canonical(result: MusicalDownResult) -> CanonicalMedia {
    let author = result.author.unwrap_or_default();
    let watermark = first_link([result.video_watermark.as_ref()]);
    let images = non_empty_images(result.images);

    CanonicalMedia {
        media_type: media_type_for(result.media_type.as_deref(), images.as_ref()),
        author: simple_author(author),
        desc: describe(result.desc),
        video_sd: watermark.clone(),
        video_hd: first_link([result.video_hd.as_ref(), watermark.as_ref()]),
        video_watermark: watermark,
        music: first_link([result.music.as_ref()]),
        images,
        upload_date: None,
    }
}

fn tikwm_to_canonical(data: TikWmData) -> CanonicalMedia {
    let author = data.author.unwrap_or_default();
    let images = non_empty_images(data.images);

    CanonicalMedia {
        media_type: media_type_for(None, images.as_ref()),
        author: Author {
            avatar: first_link([author.avatar.as_ref()]),
            nickname: first_link([author.unique_id.as_ref(), author.nickname.as_ref()])
                .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
        },
        desc: describe(data.title),
        video_sd: first_link([data.play.as_ref()]),
        video_hd: first_link([data.hdplay.as_ref(), data.play.as_ref()]),
        // Some mirror responses carry only `play`; it doubles as the watermark link.
        video_watermark: first_link([data.wmplay.as_ref(), data.play.as_ref()]),
        music: first_link([data.music.as_ref()]),
        images,
        upload_date: timestamp_from_seconds(data.create_time),
    }
}

fn simple_author(author: SimpleAuthor) -> Author {
    Author {
        avatar: first_link([author.avatar.as_ref()]),
        nickname: first_link([author.nickname.as_ref()])
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
    }
}

fn describe(desc: Option<String>) -> String {
    first_link([desc.as_ref()]).unwrap_or_else(|| NO_DESCRIPTION.to_string())
}

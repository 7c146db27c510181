use crate::types::message::UserId;
use serde::{Deserialize, Serialize};

/// One entry of the ranked match list, cached verbatim as the server
/// sent it. Field names follow the match service's wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSummary {
    #[serde(rename = "spotify_id")]
    pub peer_id: UserId,
    pub display_name: String,
    #[serde(rename = "profile_image", default)]
    pub profile_image_url: Option<String>,
    #[serde(rename = "similarity", default)]
    pub similarity_score: f64,
    #[serde(default)]
    pub shared_artists: Vec<String>,
    #[serde(default)]
    pub top_artists: Vec<String>,
}

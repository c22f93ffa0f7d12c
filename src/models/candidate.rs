use serde::{Deserialize, Serialize};

/// A feed entry that passed validation but is not yet stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub title: String,
    pub link: String,
    pub author: Option<String>,
    pub publish_date: Option<String>,
}

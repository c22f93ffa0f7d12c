mod article;
mod candidate;
mod stats;

pub use article::{Article, ArticleState, NewArticle};
pub use candidate::Candidate;
pub use stats::ArticleStats;

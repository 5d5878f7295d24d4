//! Query planning across sources and categories.
//!
//! A plan is built in two phases. Phase one is known up front: one request per
//! (category kind, query) pair. Phase two only exists for categories that
//! first fetch a directory of entities; it is derived from the entities that
//! phase one discovered.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::tally::scalar_text;
use crate::{Error, SourceApi};

/// Sub-resources fetched for every discovered entity.
pub const ENTITY_EDGES: [&str; 2] = ["feed", "statuses"];

/// An external API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Facebook,
    Twitter,
}

impl Source {
    /// Top-level collection holding the documents of a response.
    pub fn results_key(self) -> &'static str {
        match self {
            Source::Facebook => "data",
            Source::Twitter => "statuses",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Facebook => f.write_str("facebook"),
            Source::Twitter => f.write_str("twitter"),
        }
    }
}

/// A scope token selecting what to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    FacebookPublicPosts,
    FacebookPages,
    FacebookPostsInPages,
    TwitterRecent,
}

impl Category {
    pub const ALL: [Category; 4] =
        [Category::FacebookPublicPosts, Category::FacebookPages, Category::FacebookPostsInPages, Category::TwitterRecent];

    pub fn token(self) -> &'static str {
        match self {
            Category::FacebookPublicPosts => "facebook_public_posts",
            Category::FacebookPages => "facebook_pages",
            Category::FacebookPostsInPages => "facebook_posts_in_pages",
            Category::TwitterRecent => "twitter_recent",
        }
    }

    pub fn source(self) -> Source {
        match self {
            Category::FacebookPublicPosts | Category::FacebookPages | Category::FacebookPostsInPages => Source::Facebook,
            Category::TwitterRecent => Source::Twitter,
        }
    }

    /// Result kinds searched for this category.
    pub fn kinds(self) -> &'static [&'static str] {
        match self {
            Category::FacebookPublicPosts => &["post", "place"],
            Category::FacebookPages | Category::FacebookPostsInPages => &["page", "group"],
            Category::TwitterRecent => &["recent"],
        }
    }

    /// Whether the category's searches only discover entities to expand.
    pub fn is_two_stage(self) -> bool {
        matches!(self, Category::FacebookPostsInPages)
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.token() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown scope token: {s}")))
    }
}

/// Parse scope tokens, ignoring unknown ones.
pub fn parse_scope<S: AsRef<str>>(tokens: &[S]) -> BTreeSet<Category> {
    tokens
        .iter()
        .filter_map(|token| match token.as_ref().parse::<Category>() {
            Ok(category) => Some(category),
            Err(_) => {
                tracing::warn!(token = token.as_ref(), "ignoring unknown scope token");
                None
            }
        })
        .collect()
}

/// What a planned request contributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Documents are tallied.
    Flat,
    /// Documents name entities for phase two; they are not tallied.
    Directory,
    /// Documents of one sub-resource of a discovered entity.
    Entity { entity_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRequest {
    pub source: Source,
    pub stage: Stage,
    /// Result kind for searches, edge name for entity requests.
    pub label: String,
    pub url: String,
}

/// Per-source result limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub facebook: u32,
    pub twitter: u32,
}

impl Limits {
    pub fn for_source(self, source: Source) -> u32 {
        match source {
            Source::Facebook => self.facebook,
            Source::Twitter => self.twitter,
        }
    }
}

pub type Connectors = BTreeMap<Source, Arc<dyn SourceApi>>;

/// Phase-one requests of a search.
#[derive(Debug, Clone)]
pub struct SearchPlan {
    pub requests: Vec<PlannedRequest>,
}

impl SearchPlan {
    /// Plan one request per (category, kind, query).
    ///
    /// # Errors
    ///
    /// Returns `Error::AuthMissing` if the scope needs a source with no
    /// connector.
    pub fn build(
        scope: &BTreeSet<Category>, queries: &[String], limits: Limits, connectors: &Connectors,
    ) -> Result<Self, Error> {
        let mut requests = Vec::new();

        for category in scope {
            let source = category.source();
            let api = connectors.get(&source).ok_or_else(|| {
                Error::AuthMissing(format!("{} requires a configured {source} connector", category.token()))
            })?;
            let stage = if category.is_two_stage() { Stage::Directory } else { Stage::Flat };

            for kind in category.kinds() {
                for query in queries {
                    requests.push(PlannedRequest {
                        source,
                        stage: stage.clone(),
                        label: (*kind).to_string(),
                        url: api.search_url(kind, query, limits.for_source(source)),
                    });
                }
            }
        }

        Ok(Self { requests })
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Phase-two requests: every edge of every discovered entity.
    pub fn expand(entities: &[String], limits: Limits, connectors: &Connectors) -> Vec<PlannedRequest> {
        let Some(api) = connectors.get(&Source::Facebook) else {
            return Vec::new();
        };
        let limit = limits.for_source(Source::Facebook);

        entities
            .iter()
            .flat_map(|entity_id| ENTITY_EDGES.iter().map(move |edge| (entity_id, *edge)))
            .filter_map(|(entity_id, edge)| {
                api.entity_url(entity_id, edge, limit).map(|url| PlannedRequest {
                    source: Source::Facebook,
                    stage: Stage::Entity { entity_id: entity_id.clone() },
                    label: edge.to_string(),
                    url,
                })
            })
            .collect()
    }
}

/// Distinct entity ids named by directory documents, in first-seen order.
pub fn discover_entities<'a>(documents: impl IntoIterator<Item = &'a Value>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    documents
        .into_iter()
        .filter_map(|document| document.get("id").and_then(scalar_text))
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

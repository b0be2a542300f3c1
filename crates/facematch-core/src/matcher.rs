//! Nearest-neighbor identification of query embeddings against a [`Gallery`].

use crate::config::MatcherConfig;
use crate::gallery::{Gallery, GalleryError};
use crate::types::{DimensionMismatch, Embedding, Identity, MatchedIdentity, QueryFace};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error("query embedding {index}: {source}")]
    Dimension {
        index: usize,
        #[source]
        source: DimensionMismatch,
    },
}

/// Closest gallery entry to a probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest {
    pub index: usize,
    pub distance: f32,
}

/// Find the gallery entry closest to `probe` by Euclidean distance.
///
/// Every entry is visited; on equal distances the earliest entry wins.
/// Returns `None` for an empty gallery.
pub fn nearest(
    probe: &Embedding,
    known: &[Identity],
) -> Result<Option<Nearest>, DimensionMismatch> {
    let mut best: Option<Nearest> = None;

    for (index, identity) in known.iter().enumerate() {
        let distance = identity.embedding.euclidean_distance(probe)?;
        if distance.is_nan() {
            continue;
        }
        if best.map_or(true, |b| distance < b.distance) {
            best = Some(Nearest { index, distance });
        }
    }

    Ok(best)
}

/// Maps query embeddings to gallery identities.
pub struct Matcher<'g> {
    gallery: &'g Gallery,
    config: MatcherConfig,
}

impl<'g> Matcher<'g> {
    pub fn new(gallery: &'g Gallery, config: MatcherConfig) -> Self {
        Self { gallery, config }
    }

    /// Identify each query embedding, returning one result per input in input order.
    ///
    /// Loads the gallery first if it is still empty. With `adaptive_reencode`
    /// enabled, a matched identity's embedding is replaced by the query that
    /// matched it, so later queries in the same call already see the update.
    pub fn identify(&self, queries: &[Embedding]) -> Result<Vec<QueryFace>, MatchError> {
        self.gallery.ensure_loaded(false)?;

        if self.config.adaptive_reencode {
            let mut state = self.gallery.state_mut();
            check_dims(state.dim(), queries)?;

            let mut faces = Vec::with_capacity(queries.len());
            for query in queries {
                let face = self.resolve(&state.identities, query);
                if let MatchedIdentity::Known { index, .. } = &face.matched {
                    state.identities[*index].embedding = query.clone();
                }
                faces.push(face);
            }
            Ok(faces)
        } else {
            let state = self.gallery.state();
            check_dims(state.dim(), queries)?;

            Ok(queries
                .iter()
                .map(|query| self.resolve(&state.identities, query))
                .collect())
        }
    }

    /// Match one query whose length has already been checked against the gallery.
    fn resolve(&self, known: &[Identity], query: &Embedding) -> QueryFace {
        let best = nearest(query, known).ok().flatten();

        let matched = match best {
            Some(b) if b.distance <= self.config.threshold => MatchedIdentity::Known {
                index: b.index,
                name: known[b.index].name.clone(),
            },
            _ => MatchedIdentity::Unknown,
        };

        QueryFace {
            embedding: query.clone(),
            matched,
            distance: best.map(|b| b.distance),
        }
    }
}

/// Reject the whole batch before any matching if one query has the wrong length.
fn check_dims(gallery_dim: Option<usize>, queries: &[Embedding]) -> Result<(), MatchError> {
    let Some(expected) = gallery_dim else {
        return Ok(());
    };
    match queries.iter().position(|q| q.dim() != expected) {
        Some(index) => Err(MatchError::Dimension {
            index,
            source: DimensionMismatch {
                expected,
                actual: queries[index].dim(),
            },
        }),
        None => Ok(()),
    }
}

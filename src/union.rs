//! Union resolution by ordered structural trial.
//!
//! No discriminator tag travels with a union value, so the only way to pick
//! an alternative is to try them in declared order. A retryable
//! [`CodecError::ShapeMismatch`] moves on to the next alternative; any other
//! error aborts the whole resolution.
use crate::error::CodecError;
use crate::schema::SchemaNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Encoding: a live value is turned into an encoded one.
    Produce,
    /// Decoding: an encoded value is written into the live tree.
    Consume,
}

pub struct UnionResolver<'s> {
    alternatives: &'s [SchemaNode],
}

impl<'s> UnionResolver<'s> {
    pub fn new(alternatives: &'s [SchemaNode]) -> Self {
        Self { alternatives }
    }

    /// First alternative whose attempt yields `Some`. An attempt yielding
    /// `None` (a null result) does not count as a match. `Ok(None)` when
    /// nothing matched.
    pub fn produce<T, F>(&self, attempt: F) -> Result<Option<(usize, T)>, CodecError>
    where
        F: FnMut(&'s SchemaNode) -> Result<Option<T>, CodecError>,
    {
        self.run(Mode::Produce, attempt)
    }

    /// Like [`produce`](Self::produce) but an exhausted union is itself a
    /// shape mismatch, so an enclosing union can keep trying.
    pub fn consume<T, F>(&self, mut attempt: F) -> Result<(usize, T), CodecError>
    where
        F: FnMut(&'s SchemaNode) -> Result<T, CodecError>,
    {
        self.run(Mode::Consume, |alt| attempt(alt).map(Some))?.ok_or_else(|| {
            CodecError::shape(format!(
                "no alternative of {} accepts the value",
                self.describe()
            ))
        })
    }

    fn run<T, F>(&self, mode: Mode, mut attempt: F) -> Result<Option<(usize, T)>, CodecError>
    where
        F: FnMut(&'s SchemaNode) -> Result<Option<T>, CodecError>,
    {
        for (index, alt) in self.alternatives.iter().enumerate() {
            match attempt(alt) {
                Ok(Some(out)) => {
                    tracing::trace!(?mode, index, alternative = %alt.describe(), "union alternative selected");
                    return Ok(Some((index, out)));
                }
                Ok(None) => continue,
                Err(err) if err.is_retryable() => {
                    tracing::trace!(?mode, index, alternative = %alt.describe(), %err, "union alternative rejected");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    fn describe(&self) -> String {
        let alts: Vec<String> = self.alternatives.iter().map(SchemaNode::describe).collect();
        format!("[{}]", alts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ScalarKind, ScalarSchema};

    fn alts() -> Vec<SchemaNode> {
        vec![
            SchemaNode::Scalar(ScalarSchema::plain(ScalarKind::Null)),
            SchemaNode::Scalar(ScalarSchema::plain(ScalarKind::Int)),
            SchemaNode::Scalar(ScalarSchema::plain(ScalarKind::String)),
        ]
    }

    #[test]
    fn produce_skips_null_results_and_mismatches() {
        let alts = alts();
        let mut tried = Vec::new();
        let out = UnionResolver::new(&alts)
            .produce(|alt| {
                tried.push(alt.describe());
                match alt {
                    SchemaNode::Scalar(s) if s.kind == ScalarKind::Null => Ok(None),
                    SchemaNode::Scalar(s) if s.kind == ScalarKind::Int => Err(CodecError::shape("not a number")),
                    _ => Ok(Some("text")),
                }
            })
            .unwrap();
        assert_eq!(out, Some((2, "text")));
        assert_eq!(tried, vec!["null", "int", "string"]);
    }

    #[test]
    fn first_match_wins_even_when_later_ones_fit() {
        let alts = alts();
        let out = UnionResolver::new(&alts).consume(|_| Ok::<_, CodecError>(())).unwrap();
        assert_eq!(out.0, 0);
    }

    #[test]
    fn fatal_errors_are_not_swallowed() {
        let alts = alts();
        let mut calls = 0;
        let err = UnionResolver::new(&alts)
            .consume(|_| -> Result<(), CodecError> {
                calls += 1;
                Err(CodecError::EnumMismatch { value: "x".into(), symbols: vec!["a".into()] })
            })
            .unwrap_err();
        assert!(matches!(err, CodecError::EnumMismatch { .. }));
        assert_eq!(calls, 1);
    }

    #[test]
    fn exhausted_consume_is_a_shape_mismatch() {
        let alts = alts();
        let err = UnionResolver::new(&alts)
            .consume(|_| -> Result<(), CodecError> { Err(CodecError::shape("no")) })
            .unwrap_err();
        assert!(err.is_retryable());
    }
}

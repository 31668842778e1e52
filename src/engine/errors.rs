//! Game errors with blame attribution.

use std::error::Error as StdError;

use thiserror::Error;

/// An error raised while running a game, optionally blaming a roster index.
///
/// Blame travels with the error as it is wrapped; [`GameError::blamed_player`]
/// walks the chain and takes the innermost assigned index, so a fan-out
/// wrapper can stamp an index onto an index-less transport error without
/// overriding a more specific assignment made closer to the violation.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct GameError {
    message: String,
    blame: Option<usize>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl GameError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            blame: None,
            source: None,
        }
    }

    pub fn blamed(player: usize, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            blame: Some(player),
            source: None,
        }
    }

    pub fn wrap(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            blame: None,
            source: Some(Box::new(source)),
        }
    }

    pub fn blamed_wrap(
        player: usize,
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            blame: Some(player),
            source: Some(Box::new(source)),
        }
    }

    /// Blame assigned at this level only.
    pub fn blame(&self) -> Option<usize> {
        self.blame
    }

    /// Walk the cause chain and return the innermost assigned index.
    pub fn blamed_player(&self) -> Option<usize> {
        let mut result = self.blame;
        let mut current: &(dyn StdError + 'static) = self;
        while let Some(source) = current.source() {
            if let Some(inner) = source.downcast_ref::<GameError>() {
                if inner.blame.is_some() {
                    result = inner.blame;
                }
            }
            current = source;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn innermost_blame_wins() {
        let inner = GameError::blamed(2, "reused a card");
        let outer = GameError::blamed_wrap(0, "hand aborted", inner);
        assert_eq!(outer.blame(), Some(0));
        assert_eq!(outer.blamed_player(), Some(2));
    }

    #[test]
    fn wrapper_stamps_index_less_errors() {
        let transport = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stream closed");
        let stamped = GameError::blamed_wrap(1, "rpc failed", transport);
        assert_eq!(stamped.blamed_player(), Some(1));
    }

    #[test]
    fn no_blame_is_preserved() {
        let err = GameError::msg("failed creating deck prime");
        assert_eq!(err.blamed_player(), None);
    }
}

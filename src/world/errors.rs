use std::time::Duration;

use thiserror::Error;

/// Errors produced while applying events to the shared world.
///
/// The first group are expected rejections: they are reported to the issuing
/// session and never change state. The rest are infrastructure failures.
#[derive(Debug, Error)]
pub enum WorldError {
    /// The command line could not be parsed into an intent.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// The actor exists but its current state forbids the command.
    #[error("not eligible: {0}")]
    NotEligible(String),

    /// The ability is still cooling down.
    #[error("{ability} is on cooldown ({remaining:?} remaining)")]
    OnCooldown { ability: String, remaining: Duration },

    /// Not enough mana (or other pool) to pay for the ability.
    #[error("insufficient {resource}: need {needed}, have {available}")]
    InsufficientResource {
        resource: &'static str,
        needed: i32,
        available: i32,
    },

    /// The operation is only valid in another kind of room.
    #[error("wrong location: {0}")]
    WrongLocation(String),

    /// No exit leads that way.
    #[error("no exit {0}")]
    NoSuchExit(String),

    /// The exit exists but is locked and the actor lacks the key.
    #[error("blocked: {0}")]
    Blocked(String),

    /// The destination lies on a floor that has not been generated yet.
    #[error("floor {floor} not generated")]
    FloorNotGenerated { floor: u32 },

    /// Floor generation failed; the climb is rejected.
    #[error("floor generation failed: {0}")]
    GenerationFailed(String),

    /// A snapshot could not be written. Retried on the next autosave.
    #[error("persistence write failed: {0}")]
    PersistenceWriteFailed(String),

    /// Returned when fetching a record that is not present.
    #[error("not found: {0}")]
    NotFound(String),

    /// Returned when deserializing a record with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (task join errors, closed channels, unexpected conditions)
    #[error("internal error: {0}")]
    Internal(String),
}

impl WorldError {
    /// True for rejections that are the player's doing rather than a server fault.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            WorldError::InvalidCommand(_)
                | WorldError::NotEligible(_)
                | WorldError::OnCooldown { .. }
                | WorldError::InsufficientResource { .. }
                | WorldError::WrongLocation(_)
                | WorldError::NoSuchExit(_)
                | WorldError::Blocked(_)
                | WorldError::GenerationFailed(_)
                | WorldError::NotFound(_)
        )
    }

    /// Text shown to the issuing session.
    pub fn user_message(&self) -> String {
        match self {
            WorldError::InvalidCommand(msg) => {
                if msg.is_empty() {
                    "Huh? Type HELP for a list of commands.".to_string()
                } else {
                    msg.clone()
                }
            }
            WorldError::NotEligible(msg) => msg.clone(),
            WorldError::OnCooldown { ability, remaining } => format!(
                "{} is not ready yet ({:.1}s remaining).",
                ability,
                remaining.as_secs_f64()
            ),
            WorldError::InsufficientResource {
                resource,
                needed,
                available,
            } => format!(
                "You don't have enough {} ({} needed, {} available).",
                resource, needed, available
            ),
            WorldError::WrongLocation(msg) => msg.clone(),
            WorldError::NoSuchExit(dir) => {
                if dir.is_empty() {
                    "You can't go that way.".to_string()
                } else {
                    format!("You can't go {}.", dir)
                }
            }
            WorldError::Blocked(msg) => msg.clone(),
            WorldError::GenerationFailed(_) => {
                "The stairs above are shrouded in mist. You stay where you are.".to_string()
            }
            WorldError::NotFound(what) => format!("You don't see {} here.", what),
            _ => "Something went wrong. Please try again.".to_string(),
        }
    }
}

//! # Error Types
//!
//! Domain-specific error types for servo-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  servo-core errors (this file)                                         │
//! │  ├── CoreError        - Domain failures and protocol violations        │
//! │  └── ValidationError  - Operator input failures                        │
//! │                                                                         │
//! │  servo-db errors (separate crate)                                      │
//! │  └── DbError          - Storage failures, folded into CoreError        │
//! │                                                                         │
//! │  servo-sync errors (separate crate)                                    │
//! │  └── SyncError        - Link failures, wraps CoreError                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! None of these halt the control loop. The agent turns them into operator
//! notices or log lines at the boundary where they are detected.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An intent named an actuator that is not in the current collection.
    #[error("Unknown actuator: {0}")]
    UnknownActuator(String),

    /// A preset lookup found nothing under that name.
    #[error("Preset not found: {0}")]
    PresetNotFound(String),

    /// A batch operation is already running.
    ///
    /// ## When This Occurs
    /// - Operator presses "Enable All" while a disable batch is in flight
    /// - Operator starts the wave while an enable batch is in flight
    #[error("A batch operation is already running: {running}")]
    BatchInProgress { running: String },

    /// A progress or completion event arrived with no batch running.
    #[error("No batch operation is running")]
    NoActiveBatch,

    /// More progress events arrived than the batch announced.
    ///
    /// ## User Workflow
    /// ```text
    /// enable_all_started { total: 14 }
    ///      │
    ///      ▼
    /// motor_enabled × 14   → progress 14/14
    ///      │
    ///      ▼
    /// motor_enabled (15th) → ProtocolOverrun { total: 14, received: 15 }
    /// ```
    #[error("Batch progress overrun: {received} events for a total of {total}")]
    ProtocolOverrun { total: u32, received: u32 },

    /// A fine-tune answer referenced a ticket that is not open.
    #[error("No pending fine-tune request with ticket {0}")]
    UnknownTicket(u64),

    /// The durable preset record exists but cannot be parsed.
    #[error("Preset record is corrupt: {0}")]
    CorruptPresetRecord(String),

    /// The preset backend failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Returns true if the error comes from operator input rather than from
    /// the controller or storage.
    ///
    /// User errors are reported back synchronously and mutate nothing.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            CoreError::UnknownActuator(_)
                | CoreError::PresetNotFound(_)
                | CoreError::BatchInProgress { .. }
                | CoreError::UnknownTicket(_)
                | CoreError::Validation(_)
        )
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Operator input errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Input could not be parsed.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Angle lies outside the actuator's bounds.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: f64, max: f64 },

    /// NaN or infinite angle.
    #[error("{field} must be a finite number")]
    NotFinite { field: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

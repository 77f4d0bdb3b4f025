//! Well-known metadata keys and reply names.

/// Name of the command a message carries.
pub const COMMAND_NAME: &str = "COMMAND_NAME";

/// Subject the command's reply must be published to.
pub const COMMAND_REPLY_CHANNEL: &str = "COMMAND_REPLY_CHANNEL";

/// Correlation id of the saga instance that issued a command.
pub const SAGA_ID: &str = "SAGA_ID";

/// Name of the saga definition that issued a command.
pub const SAGA_NAME: &str = "SAGA_NAME";

/// `SUCCESS` or `FAILURE`, set on every reply.
pub const REPLY_OUTCOME: &str = "REPLY_OUTCOME";

/// Id of the command a reply answers.
pub const REPLY_COMMAND_ID: &str = "REPLY_COMMAND_ID";

pub const OUTCOME_SUCCESS: &str = "SUCCESS";
pub const OUTCOME_FAILURE: &str = "FAILURE";

/// Reply name used when a command handler succeeds without a custom reply.
pub const SUCCESS_REPLY: &str = "am.Success";

/// Reply name used when a command handler fails without a custom reply.
pub const FAILURE_REPLY: &str = "am.Failure";

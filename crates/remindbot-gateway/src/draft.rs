//! Typed view of a chat's in-progress reminder form.
//!
//! Storage keeps the form as a flat string map. The set of keys present
//! decides the step:
//!
//! | keys                                     | step                    |
//! |------------------------------------------|-------------------------|
//! | (none)                                   | awaiting name           |
//! | name                                     | awaiting message        |
//! | name, message                            | awaiting type selection |
//! | name, message, is_recurring              | awaiting schedule       |
//! | name, message, is_recurring, schedule    | awaiting confirmation   |
//!
//! Any other shape does not map to a [`Draft`].

use remindbot_storage::ChatContext;

pub const KEY_NAME: &str = "name";
pub const KEY_MESSAGE: &str = "message";
pub const KEY_IS_RECURRING: &str = "is_recurring";
pub const KEY_SCHEDULE: &str = "schedule";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Draft {
    AwaitingName,
    AwaitingMessage {
        name: String,
    },
    AwaitingType {
        name: String,
        message: String,
    },
    AwaitingSchedule {
        name: String,
        message: String,
        recurring: bool,
    },
    AwaitingConfirmation {
        name: String,
        message: String,
        recurring: bool,
        schedule: String,
    },
}

impl Draft {
    /// Interpret a stored context. `None` for unrecognised shapes.
    pub fn from_context(context: &ChatContext) -> Option<Self> {
        let field = |key: &str| context.get(key).map(str::to_string);
        let recurring = || match context.get(KEY_IS_RECURRING) {
            Some("true") => Some(true),
            Some("false") => Some(false),
            _ => None,
        };

        let draft = match context.len() {
            0 => Self::AwaitingName,
            1 => Self::AwaitingMessage {
                name: field(KEY_NAME)?,
            },
            2 => Self::AwaitingType {
                name: field(KEY_NAME)?,
                message: field(KEY_MESSAGE)?,
            },
            3 => Self::AwaitingSchedule {
                name: field(KEY_NAME)?,
                message: field(KEY_MESSAGE)?,
                recurring: recurring()?,
            },
            4 => Self::AwaitingConfirmation {
                name: field(KEY_NAME)?,
                message: field(KEY_MESSAGE)?,
                recurring: recurring()?,
                schedule: field(KEY_SCHEDULE)?,
            },
            _ => return None,
        };
        Some(draft)
    }

    /// Flatten back into the stored representation.
    pub fn to_context(&self) -> ChatContext {
        let mut context = ChatContext::new();
        match self {
            Self::AwaitingName => {}
            Self::AwaitingMessage { name } => {
                context.insert(KEY_NAME, name.as_str());
            }
            Self::AwaitingType { name, message } => {
                context.insert(KEY_NAME, name.as_str());
                context.insert(KEY_MESSAGE, message.as_str());
            }
            Self::AwaitingSchedule {
                name,
                message,
                recurring,
            } => {
                context.insert(KEY_NAME, name.as_str());
                context.insert(KEY_MESSAGE, message.as_str());
                context.insert(KEY_IS_RECURRING, recurring.to_string());
            }
            Self::AwaitingConfirmation {
                name,
                message,
                recurring,
                schedule,
            } => {
                context.insert(KEY_NAME, name.as_str());
                context.insert(KEY_MESSAGE, message.as_str());
                context.insert(KEY_IS_RECURRING, recurring.to_string());
                context.insert(KEY_SCHEDULE, schedule.as_str());
            }
        }
        context
    }

    /// Step label for logs.
    pub fn step(&self) -> &'static str {
        match self {
            Self::AwaitingName => "awaiting_name",
            Self::AwaitingMessage { .. } => "awaiting_message",
            Self::AwaitingType { .. } => "awaiting_type",
            Self::AwaitingSchedule { .. } => "awaiting_schedule",
            Self::AwaitingConfirmation { .. } => "awaiting_confirmation",
        }
    }

    /// Number of fields collected so far.
    pub fn depth(&self) -> usize {
        match self {
            Self::AwaitingName => 0,
            Self::AwaitingMessage { .. } => 1,
            Self::AwaitingType { .. } => 2,
            Self::AwaitingSchedule { .. } => 3,
            Self::AwaitingConfirmation { .. } => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, &str)]) -> ChatContext {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_steps_from_key_sets() {
        assert_eq!(Draft::from_context(&ctx(&[])), Some(Draft::AwaitingName));
        assert_eq!(
            Draft::from_context(&ctx(&[("name", "x")])),
            Some(Draft::AwaitingMessage { name: "x".into() })
        );
        assert_eq!(
            Draft::from_context(&ctx(&[("name", "x"), ("message", "y")])),
            Some(Draft::AwaitingType {
                name: "x".into(),
                message: "y".into()
            })
        );
        assert_eq!(
            Draft::from_context(&ctx(&[
                ("name", "x"),
                ("message", "y"),
                ("is_recurring", "true")
            ])),
            Some(Draft::AwaitingSchedule {
                name: "x".into(),
                message: "y".into(),
                recurring: true
            })
        );
        let full = Draft::from_context(&ctx(&[
            ("name", "x"),
            ("message", "y"),
            ("is_recurring", "false"),
            ("schedule", "2099-01-01 00:00:00"),
        ]))
        .unwrap();
        assert_eq!(full.step(), "awaiting_confirmation");
    }

    #[test]
    fn test_unrecognised_shapes() {
        // Wrong key for the count.
        assert_eq!(Draft::from_context(&ctx(&[("message", "y")])), None);
        assert_eq!(
            Draft::from_context(&ctx(&[("name", "x"), ("is_recurring", "true")])),
            None
        );
        // Not a boolean.
        assert_eq!(
            Draft::from_context(&ctx(&[
                ("name", "x"),
                ("message", "y"),
                ("is_recurring", "yes")
            ])),
            None
        );
        // Extra key.
        assert_eq!(
            Draft::from_context(&ctx(&[
                ("name", "x"),
                ("message", "y"),
                ("is_recurring", "true"),
                ("schedule", "* * * * *"),
                ("extra", "z"),
            ])),
            None
        );
    }

    #[test]
    fn test_context_round_trip() {
        let drafts = [
            Draft::AwaitingName,
            Draft::AwaitingMessage { name: "x".into() },
            Draft::AwaitingType {
                name: "x".into(),
                message: "y".into(),
            },
            Draft::AwaitingSchedule {
                name: "x".into(),
                message: "y".into(),
                recurring: false,
            },
            Draft::AwaitingConfirmation {
                name: "x".into(),
                message: "y".into(),
                recurring: true,
                schedule: "0 9 * * *".into(),
            },
        ];
        for (depth, draft) in drafts.into_iter().enumerate() {
            let context = draft.to_context();
            assert_eq!(context.len(), depth);
            assert_eq!(Draft::from_context(&context), Some(draft));
        }
    }

    #[test]
    fn test_is_recurring_serialized_as_string() {
        let context = Draft::AwaitingSchedule {
            name: "x".into(),
            message: "y".into(),
            recurring: true,
        }
        .to_context();
        assert_eq!(context.get("is_recurring"), Some("true"));
    }
}

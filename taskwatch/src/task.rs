//! Task entity and its status transitions.
//!
//! A [`Task`] carries two independent flags, completion and urgency. The
//! persisted form only has room for one status token, so the flags are
//! folded into a [`TaskStatus`] tag whenever something needs to dispatch on
//! "what state is this task in": the codec, the listing filters and the
//! transition rules below.
//!
//! # Transitions
//!
//! | Current status | toggle done | toggle priority |
//! |----------------|-------------|-----------------|
//! | `Pending`      | `Completed` | `Urgent`        |
//! | `Urgent`       | `Completed` | `Pending`       |
//! | `Completed`    | back to `Urgent` or `Pending` (urgency is remembered) | rejected |
//!
//! # Example
//!
//! ```
//! use taskwatch::task::{Task, TaskStatus};
//!
//! let mut task = Task::new("Buy milk", "2 liters").unwrap();
//! task.toggle_priority().unwrap();
//! assert_eq!(task.status(), TaskStatus::Urgent);
//!
//! task.toggle_done();
//! assert_eq!(task.status(), TaskStatus::Completed);
//! assert!(task.is_urgent());
//! ```

use std::fmt;

use thiserror::Error;

/// Errors raised when a task field or transition is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// A required field is empty or whitespace only.
    #[error("{field} cannot be empty")]
    EmptyField {
        /// Name of the offending field.
        field: &'static str,
    },

    /// A field contains a character that would break the line format.
    #[error("{field} cannot contain commas or line breaks")]
    ForbiddenCharacter {
        /// Name of the offending field.
        field: &'static str,
    },

    /// Priority only applies to tasks that are still open.
    #[error("only pending or urgent tasks can change priority")]
    PriorityOfCompleted,
}

/// The single status a task presents to the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Open, normal priority.
    Pending,
    /// Open, flagged urgent.
    Urgent,
    /// Done. Wins over urgency.
    Completed,
}

impl TaskStatus {
    /// Returns the token used for this status in task files and listings.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Urgent => "Urgent",
            TaskStatus::Completed => "Completed",
        }
    }

    /// Maps a status token back to a status.
    ///
    /// Anything other than `Completed` or `Urgent`, including an empty token,
    /// is treated as `Pending`.
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        match token {
            "Completed" => TaskStatus::Completed,
            "Urgent" => TaskStatus::Urgent,
            _ => TaskStatus::Pending,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single task tracked for a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    title: String,
    description: String,
    done: bool,
    urgent: bool,
}

impl Task {
    /// Creates a pending, non-urgent task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] if either field is empty or contains a comma or
    /// line break.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Result<Self, TaskError> {
        let title = title.into();
        let description = description.into();
        validate_field("title", &title)?;
        validate_field("description", &description)?;

        Ok(Self {
            title,
            description,
            done: false,
            urgent: false,
        })
    }

    /// Creates a task already in the given status.
    ///
    /// # Errors
    ///
    /// Same as [`Task::new`].
    pub fn with_status(
        title: impl Into<String>,
        description: impl Into<String>,
        status: TaskStatus,
    ) -> Result<Self, TaskError> {
        let mut task = Self::new(title, description)?;
        match status {
            TaskStatus::Pending => {}
            TaskStatus::Urgent => task.urgent = true,
            TaskStatus::Completed => task.done = true,
        }
        Ok(task)
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    #[must_use]
    pub fn is_urgent(&self) -> bool {
        self.urgent
    }

    /// Folds the two flags into the status tag. Completion wins.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        if self.done {
            TaskStatus::Completed
        } else if self.urgent {
            TaskStatus::Urgent
        } else {
            TaskStatus::Pending
        }
    }

    /// Replaces the title.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] if the new title is not a valid field.
    pub fn set_title(&mut self, title: impl Into<String>) -> Result<(), TaskError> {
        let title = title.into();
        validate_field("title", &title)?;
        self.title = title;
        Ok(())
    }

    /// Replaces the description.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] if the new description is not a valid field.
    pub fn set_description(&mut self, description: impl Into<String>) -> Result<(), TaskError> {
        let description = description.into();
        validate_field("description", &description)?;
        self.description = description;
        Ok(())
    }

    /// Flips completion.
    ///
    /// Reopening a completed task leaves its urgency untouched, so a task
    /// that was urgent before completion comes back as urgent.
    pub fn toggle_done(&mut self) {
        self.done = match self.status() {
            TaskStatus::Pending | TaskStatus::Urgent => true,
            TaskStatus::Completed => false,
        };
    }

    /// Flips urgency of an open task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::PriorityOfCompleted`] for completed tasks.
    pub fn toggle_priority(&mut self) -> Result<(), TaskError> {
        match self.status() {
            TaskStatus::Pending => self.urgent = true,
            TaskStatus::Urgent => self.urgent = false,
            TaskStatus::Completed => return Err(TaskError::PriorityOfCompleted),
        }
        Ok(())
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} [{}]", self.title, self.description, self.status())
    }
}

/// Selection used by task listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskFilter {
    #[default]
    All,
    /// Every open task, urgent ones included.
    Pending,
    /// Open tasks flagged urgent.
    Urgent,
    Completed,
}

impl TaskFilter {
    #[must_use]
    pub fn matches(self, task: &Task) -> bool {
        match self {
            TaskFilter::All => true,
            TaskFilter::Pending => !task.is_done(),
            TaskFilter::Urgent => task.status() == TaskStatus::Urgent,
            TaskFilter::Completed => task.is_done(),
        }
    }

    /// Heading shown above a filtered listing.
    #[must_use]
    pub fn heading(self) -> &'static str {
        match self {
            TaskFilter::All => "All tasks",
            TaskFilter::Pending => "Pending tasks",
            TaskFilter::Urgent => "Urgent tasks",
            TaskFilter::Completed => "Completed tasks",
        }
    }
}

/// Checks that a text field can be stored in a task line.
///
/// # Errors
///
/// Returns [`TaskError::EmptyField`] for empty or whitespace-only values and
/// [`TaskError::ForbiddenCharacter`] for commas, `\n` or `\r`.
pub fn validate_field(field: &'static str, value: &str) -> Result<(), TaskError> {
    if value.trim().is_empty() {
        return Err(TaskError::EmptyField { field });
    }
    if value.contains([',', '\n', '\r']) {
        return Err(TaskError::ForbiddenCharacter { field });
    }
    Ok(())
}

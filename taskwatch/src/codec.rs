//! Line codec for task files.
//!
//! Every task occupies one line of the form `title,description,status` where
//! `status` is one of `Completed`, `Urgent` or `Pending`. A task that is both
//! done and urgent is written as `Completed`; its urgency does not survive a
//! reload.
//!
//! Decoding is lenient: a line that does not split into exactly three fields,
//! or whose title or description is empty, is skipped rather than reported.
//!
//! # Example
//!
//! ```
//! use taskwatch::codec::{decode, encode};
//!
//! let task = decode("Buy milk,2 liters,Urgent").unwrap();
//! assert!(task.is_urgent());
//! assert_eq!(encode(&task), "Buy milk,2 liters,Urgent");
//!
//! assert!(decode("only,two").is_none());
//! ```

use crate::task::{Task, TaskStatus};

/// Field separator of the line format.
pub const FIELD_SEPARATOR: char = ',';

/// Encodes a task as a single line, without the trailing newline.
///
/// The fields of a [`Task`] are validated at construction, so they never
/// contain the separator or a line break.
#[must_use]
pub fn encode(task: &Task) -> String {
    format!(
        "{}{sep}{}{sep}{}",
        task.title(),
        task.description(),
        task.status().as_str(),
        sep = FIELD_SEPARATOR
    )
}

/// Decodes one line into a task, or `None` if the line is malformed.
#[must_use]
pub fn decode(line: &str) -> Option<Task> {
    let line = line.strip_suffix('\r').unwrap_or(line);

    let mut fields = line.split(FIELD_SEPARATOR);
    let (title, description, token) = (fields.next()?, fields.next()?, fields.next()?);
    if fields.next().is_some() {
        return None;
    }

    Task::with_status(title, description, TaskStatus::from_token(token)).ok()
}

/// Decodes every well-formed line of a file body, keeping file order.
#[must_use]
pub fn decode_all(content: &str) -> Vec<Task> {
    content.lines().filter_map(decode).collect()
}

/// Encodes tasks into a file body with one newline-terminated line each.
#[must_use]
pub fn encode_all<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> String {
    let mut out = String::new();
    for task in tasks {
        out.push_str(&encode(task));
        out.push('\n');
    }
    out
}

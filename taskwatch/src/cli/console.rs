//! Line-oriented terminal I/O for the menu.
//!
//! Reads go through a mutex and run on the blocking pool, so a pending read
//! never stalls the runtime and two readers never split a line between them.

use std::fmt::Display;
use std::io::{self, BufRead, BufReader, Write};
use std::sync::{Arc, Mutex};

use crate::cli::validate::ValidationError;

type Input = Arc<Mutex<Box<dyn BufRead + Send>>>;

/// Terminal (or scripted) input and output.
pub struct Console {
    input: Input,
    output: Box<dyn Write + Send>,
}

impl Console {
    /// Console on the process's stdin and stdout.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }

    pub fn new(input: impl BufRead + Send + 'static, output: impl Write + Send + 'static) -> Self {
        Self {
            input: Arc::new(Mutex::new(Box::new(input))),
            output: Box::new(output),
        }
    }

    /// Reads one line without its line ending. `None` at end of input.
    ///
    /// # Errors
    ///
    /// Returns the underlying read error.
    pub async fn read_line(&self) -> io::Result<Option<String>> {
        let input = Arc::clone(&self.input);
        tokio::task::spawn_blocking(move || -> io::Result<Option<String>> {
            let mut reader = input
                .lock()
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "console input lock poisoned"))?;

            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let trimmed = line.trim_end_matches(['\n', '\r']).len();
            line.truncate(trimmed);
            Ok(Some(line))
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }

    /// Writes `text` followed by a newline.
    ///
    /// # Errors
    ///
    /// Returns the underlying write error.
    pub fn say(&mut self, text: impl Display) -> io::Result<()> {
        writeln!(self.output, "{text}")?;
        self.output.flush()
    }

    /// Writes `text` without a newline, for prompts.
    ///
    /// # Errors
    ///
    /// Returns the underlying write error.
    pub fn show(&mut self, text: impl Display) -> io::Result<()> {
        write!(self.output, "{text}")?;
        self.output.flush()
    }

    /// Prompts until `parse` accepts the input.
    ///
    /// Each rejection prints the validation message and asks again. Returns
    /// `None` if input ends first.
    ///
    /// # Errors
    ///
    /// Returns console I/O errors.
    pub async fn prompt<T, F>(&mut self, prompt: &str, parse: F) -> io::Result<Option<T>>
    where
        F: Fn(&str) -> Result<T, ValidationError>,
    {
        loop {
            self.show(prompt)?;
            let Some(line) = self.read_line().await? else {
                return Ok(None);
            };
            match parse(&line) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => self.say(e)?,
            }
        }
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}

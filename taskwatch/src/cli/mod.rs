//! Interactive menu and the non-interactive `list` command.
//!
//! # Modules
//!
//! - [`console`]: Line-oriented terminal I/O
//! - [`validate`]: Parsing and validation of menu input
//!
//! Task numbers shown to the user are 1-based positions in the full list,
//! also in filtered views, so a number read off any listing can be used in
//! the modify and remove menus.

pub mod console;
pub mod validate;

pub use console::Console;
pub use validate::ValidationError;

use crate::config::Config;
use crate::error::Result;
use crate::gateway::Gateway;
use crate::logger::LoggerState;
use crate::session::Session;
use crate::store::TaskStore;
use crate::task::{Task, TaskFilter};

use validate::{validate_choice, validate_description, validate_index, validate_name, validate_title};

const MAIN_MENU: &str = "\
What would you like to do?
1. View tasks
2. Add a task
3. Modify tasks
4. Remove a task
0. Exit";

const VIEW_MENU: &str = "\
What would you like to do?
1. View every task
2. View pending tasks
3. View urgent tasks
4. View completed tasks
0. Go back";

const MODIFY_MENU: &str = "\
What would you like to do with the task?
1. Change status
2. Change priority
3. Change title
4. Change description
0. Go back";

const CHOICE_PROMPT: &str = "> ";

/// Runs the interactive menu for one session.
///
/// Prompts for the name when `name` is `None`. End of input anywhere counts
/// as choosing "Exit".
///
/// # Errors
///
/// Returns session startup errors, console I/O errors and shutdown errors.
pub async fn run_interactive(config: &Config, name: Option<String>, console: &mut Console) -> Result<()> {
    let name = match name {
        Some(name) => validate_name(&name)?,
        None => match console.prompt("Please enter your name: ", validate_name).await? {
            Some(name) => name,
            None => return Ok(()),
        },
    };

    let mut session = Session::open(config, &name).await?;

    console.say(format!("\nHi, {name}! Welcome to taskwatch."))?;
    if config.heartbeat_enabled && session.logger_state() == LoggerState::Inactive {
        console.say("Another session is already keeping the heartbeat for this name. Activity is still logged.")?;
    }
    if config.watch_enabled && !session.is_watching() {
        console.say("Live reload is unavailable; changes made elsewhere will not show up.")?;
    }

    let outcome = main_menu(&mut session, console).await;
    let closed = session.close().await;
    if outcome.is_ok() {
        console.say(format!("Goodbye, {name}!"))?;
    }
    outcome.and(closed)
}

/// Prints `name`'s tasks matching `filter` without starting a session.
///
/// # Errors
///
/// Returns an error for an invalid name or an unreadable task file.
pub async fn list_tasks(config: &Config, name: &str, filter: TaskFilter, console: &mut Console) -> Result<()> {
    let name = validate_name(name)?;
    let gateway = Gateway::new(config.tasks_dir())?;

    if !gateway.exists(&name).await? {
        console.say(format!("No task file for {name}."))?;
        return Ok(());
    }

    let store = TaskStore::new();
    gateway.load(&name, &store).await?;
    print_tasks(console, filter, &store.snapshot().await)?;
    Ok(())
}

async fn main_menu(session: &mut Session, console: &mut Console) -> Result<()> {
    loop {
        if let Some(e) = session.take_watcher_failure().await {
            console.say(format!("Live reload stopped: {e}"))?;
        }

        console.say(format!("\n{MAIN_MENU}"))?;
        let Some(choice) = console.prompt(CHOICE_PROMPT, |s| validate_choice(s, 4)).await? else {
            return Ok(());
        };

        match choice {
            1 => view_menu(session, console).await?,
            2 => add_task(session, console).await?,
            3 => modify_menu(session, console).await?,
            4 => remove_menu(session, console).await?,
            _ => return Ok(()),
        }
    }
}

async fn view_menu(session: &Session, console: &mut Console) -> Result<()> {
    let tasks = session.tasks(TaskFilter::All).await;
    if tasks.is_empty() {
        console.say("There are no tasks to view.")?;
        return Ok(());
    }

    console.say(VIEW_MENU)?;
    let filter = match console.prompt(CHOICE_PROMPT, |s| validate_choice(s, 4)).await? {
        Some(1) => TaskFilter::All,
        Some(2) => TaskFilter::Pending,
        Some(3) => TaskFilter::Urgent,
        Some(4) => TaskFilter::Completed,
        _ => return Ok(()),
    };

    print_tasks(console, filter, &tasks)?;
    Ok(())
}

async fn add_task(session: &Session, console: &mut Console) -> Result<()> {
    let Some(title) = console.prompt("Title: ", validate_title).await? else {
        return Ok(());
    };
    let Some(description) = console.prompt("Description: ", validate_description).await? else {
        return Ok(());
    };

    let task = Task::new(title, description)?;
    console.say(format!("Added: {task}"))?;
    session.add_task(task).await;
    Ok(())
}

async fn modify_menu(session: &Session, console: &mut Console) -> Result<()> {
    let Some(index) = pick_task(session, console, "modify").await? else {
        return Ok(());
    };

    console.say(MODIFY_MENU)?;
    let Some(action) = console.prompt(CHOICE_PROMPT, |s| validate_choice(s, 4)).await? else {
        return Ok(());
    };

    let result = match action {
        1 => Ok(session.toggle_done(index).await),
        2 => session.toggle_priority(index).await,
        3 => match console.prompt("New title: ", validate_title).await? {
            Some(title) => session.set_title(index, &title).await,
            None => return Ok(()),
        },
        4 => match console.prompt("New description: ", validate_description).await? {
            Some(description) => session.set_description(index, &description).await,
            None => return Ok(()),
        },
        _ => return Ok(()),
    };

    match result {
        Ok(Some(task)) => console.say(format!("Updated: {task}"))?,
        Ok(None) => console.say("That task no longer exists.")?,
        Err(e) => console.say(e)?,
    }
    Ok(())
}

async fn remove_menu(session: &Session, console: &mut Console) -> Result<()> {
    let Some(index) = pick_task(session, console, "remove").await? else {
        return Ok(());
    };

    match session.remove_task(index).await {
        Some(task) => console.say(format!("Removed: {task}"))?,
        None => console.say("That task no longer exists.")?,
    }
    Ok(())
}

/// Lists every task and asks for one. `None` means "go back".
async fn pick_task(session: &Session, console: &mut Console, verb: &str) -> Result<Option<usize>> {
    let tasks = session.tasks(TaskFilter::All).await;
    if tasks.is_empty() {
        console.say(format!("There are no tasks to {verb}."))?;
        return Ok(None);
    }

    console.say(format!("Which task would you like to {verb}?"))?;
    for (i, task) in tasks.iter().enumerate() {
        console.say(format!("{}. {task}", i + 1))?;
    }
    console.say("0. Go back")?;

    let len = tasks.len();
    Ok(console
        .prompt(CHOICE_PROMPT, |s| validate_index(s, len))
        .await?
        .flatten())
}

fn print_tasks(console: &mut Console, filter: TaskFilter, tasks: &[Task]) -> std::io::Result<()> {
    console.say(format!("{}:", filter.heading()))?;

    let mut shown = 0;
    for (i, task) in tasks.iter().enumerate().filter(|(_, t)| filter.matches(t)) {
        console.say(format!("{}. {task}", i + 1))?;
        shown += 1;
    }
    if shown == 0 {
        console.say("(none)")?;
    }
    Ok(())
}

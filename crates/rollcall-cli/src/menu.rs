//! Interactive text menu.

use anyhow::Result;
use std::io::{BufRead, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Register,
    Recognize,
    Delete,
    List,
    Exit,
}

impl MenuChoice {
    const ALL: [MenuChoice; 5] = [
        MenuChoice::Register,
        MenuChoice::Recognize,
        MenuChoice::Delete,
        MenuChoice::List,
        MenuChoice::Exit,
    ];

    fn label(self) -> &'static str {
        match self {
            MenuChoice::Register => "Register new user",
            MenuChoice::Recognize => "Run attendance (Ctrl-C to stop)",
            MenuChoice::Delete => "Delete user",
            MenuChoice::List => "List users",
            MenuChoice::Exit => "Exit",
        }
    }

    /// Parse a 1-based menu number.
    pub fn parse(input: &str) -> Result<Self, String> {
        let n: usize = input
            .trim()
            .parse()
            .map_err(|_| format!("'{}' is not a number", input.trim()))?;
        n.checked_sub(1)
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or_else(|| format!("choose between 1 and {}", Self::ALL.len()))
    }
}

/// What the menu can ask the application to do.
pub trait MenuActions {
    fn register(&mut self, name: &str) -> Result<()>;
    fn recognize(&mut self) -> Result<()>;
    fn delete(&mut self, name: &str) -> Result<()>;
    fn list(&mut self) -> Result<()>;
}

/// Run the menu until Exit or end of input.
///
/// Invalid selections are reported and the menu is shown again. Errors from
/// an action are printed and do not end the loop.
pub fn run<R, W, A>(input: &mut R, out: &mut W, actions: &mut A) -> Result<()>
where
    R: BufRead,
    W: Write,
    A: MenuActions + ?Sized,
{
    loop {
        writeln!(out)?;
        for (i, choice) in MenuChoice::ALL.iter().enumerate() {
            writeln!(out, "  {}. {}", i + 1, choice.label())?;
        }
        let Some(line) = prompt(input, out, "Select an option: ")? else {
            return Ok(());
        };

        let choice = match MenuChoice::parse(&line) {
            Ok(choice) => choice,
            Err(msg) => {
                writeln!(out, "Invalid selection: {msg}")?;
                continue;
            }
        };

        let result = match choice {
            MenuChoice::Exit => return Ok(()),
            MenuChoice::List => actions.list(),
            MenuChoice::Recognize => actions.recognize(),
            MenuChoice::Register | MenuChoice::Delete => {
                let Some(name) = prompt(input, out, "Name: ")? else {
                    return Ok(());
                };
                if name.trim().is_empty() {
                    writeln!(out, "Name cannot be empty.")?;
                    continue;
                }
                if choice == MenuChoice::Register {
                    actions.register(&name)
                } else {
                    actions.delete(&name)
                }
            }
        };

        if let Err(e) = result {
            tracing::debug!(error = ?e, "menu action failed");
            writeln!(out, "Error: {e:#}")?;
        }
    }
}

/// Print `label`, read one line. `None` at end of input.
fn prompt<R: BufRead, W: Write>(input: &mut R, out: &mut W, label: &str) -> Result<Option<String>> {
    write!(out, "{label}")?;
    out.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(&['\r', '\n'][..]).to_string()))
}

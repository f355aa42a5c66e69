//! Interactive prompts for settings not given on the command line

use anyhow::{Context, Result};
use colored::*;
use rustyline::DefaultEditor;

use crate::config::CONVENTIONAL_PORTS;
use crate::device::PortInfo;

/// Line-based prompt session on the terminal
pub struct Prompt {
    editor: DefaultEditor,
}

impl Prompt {
    pub fn new() -> Result<Self> {
        let editor = DefaultEditor::new().context("Failed to initialize terminal prompt")?;
        Ok(Self { editor })
    }

    /// Ask until `parse` accepts the answer; Ctrl+C / Ctrl+D abort
    fn ask<T>(&mut self, question: &str, parse: impl Fn(&str) -> Result<T>) -> Result<T> {
        loop {
            let line = self
                .editor
                .readline(question)
                .context("Input aborted")?;
            match parse(&line) {
                Ok(value) => return Ok(value),
                Err(e) => println!("{}", e.to_string().red()),
            }
        }
    }

    /// Ask for the remote port
    pub fn remote_port(&mut self) -> Result<u16> {
        let question = format!(
            "What internet port would you like to use ({})? ",
            CONVENTIONAL_PORTS
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join("/")
        );
        self.ask(&question, parse_port)
    }

    /// List input ports and ask for one
    pub fn device_index(&mut self, ports: &[PortInfo]) -> Result<usize> {
        print_ports(ports);
        let count = ports.len();
        self.ask("What midi port would you like to use? ", |line| {
            parse_index(line, count)
        })
    }
}

/// Parse a port number in 1-65535
pub fn parse_port(input: &str) -> Result<u16> {
    let port: u16 = input
        .trim()
        .parse()
        .with_context(|| format!("'{}' is not a valid port number", input.trim()))?;
    if port == 0 {
        anyhow::bail!("Port must be between 1 and 65535");
    }
    Ok(port)
}

/// Parse a port index below `count`
pub fn parse_index(input: &str, count: usize) -> Result<usize> {
    let index: usize = input
        .trim()
        .parse()
        .with_context(|| format!("'{}' is not a valid port index", input.trim()))?;
    if index >= count {
        anyhow::bail!("No MIDI input at index {} ({} available)", index, count);
    }
    Ok(index)
}

/// Print MIDI input ports with their index
pub fn print_ports(ports: &[PortInfo]) {
    println!("\n{}", "midi input (transmit) available:".bold().cyan());
    if ports.is_empty() {
        println!("  {}", "(no MIDI inputs found)".dimmed());
    }
    for port in ports {
        let virtual_tag = if port.is_virtual {
            " [VIRTUAL]".dimmed().to_string()
        } else {
            String::new()
        };
        println!("  [{}] {}{}", port.index.to_string().yellow(), port.name, virtual_tag);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("3902").unwrap(), 3902);
        assert_eq!(parse_port("  3907\n").unwrap(), 3907);
        assert!(parse_port("0").is_err());
        assert!(parse_port("70000").is_err());
        assert!(parse_port("abc").is_err());
    }

    #[test]
    fn test_parse_index() {
        assert_eq!(parse_index("1", 2).unwrap(), 1);
        assert!(parse_index("2", 2).is_err());
        assert!(parse_index("-1", 2).is_err());
        assert!(parse_index("", 2).is_err());
    }
}

use crate::app::actions::Action;
use crate::app::events::{Event, InputEvent};
use std::io::BufRead;
use tokio::sync::mpsc;

/// Reads commands from stdin on a blocking thread.
pub fn spawn_input_task(tx: mpsc::Sender<Event>) {
    tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.blocking_send(Event::Input(InputEvent::Line(line))).is_err() {
                return;
            }
        }
        let _ = tx.blocking_send(Event::Input(InputEvent::Closed));
    });
}

pub const HELP: &str = "commands: <n> play sidebar entry n | play <url> | list | pause | resume | help | quit";

pub fn map_input_to_action(ev: InputEvent) -> Option<Action> {
    match ev {
        InputEvent::Closed => None,
        InputEvent::Line(line) => parse_command(&line),
    }
}

fn parse_command(line: &str) -> Option<Action> {
    let line = line.trim();
    if let Ok(n) = line.parse::<usize>() {
        return Some(Action::Select(n));
    }
    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((c, r)) => (c, r.trim()),
        None => (line, ""),
    };
    match cmd.to_ascii_lowercase().as_str() {
        "q" | "quit" | "exit" => Some(Action::Quit),
        "h" | "help" | "?" => Some(Action::Help),
        "l" | "list" | "ls" => Some(Action::List),
        "p" | "pause" => Some(Action::Pause),
        "r" | "resume" => Some(Action::Resume),
        "play" if !rest.is_empty() => Some(Action::PlayUrl(rest.to_string())),
        // an empty url still goes through so the blank-url notice shows
        "play" => Some(Action::PlayUrl(String::new())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(s: &str) -> Option<Action> {
        map_input_to_action(InputEvent::Line(s.to_string()))
    }

    #[test]
    fn test_commands() {
        assert_eq!(line(" 3 "), Some(Action::Select(3)));
        assert_eq!(line("q"), Some(Action::Quit));
        assert_eq!(line("PAUSE"), Some(Action::Pause));
        assert_eq!(line("resume"), Some(Action::Resume));
        assert_eq!(
            line("play  http://h/live/1.m3u8 "),
            Some(Action::PlayUrl("http://h/live/1.m3u8".into()))
        );
        assert_eq!(line("play"), Some(Action::PlayUrl(String::new())));
        assert_eq!(line("dance"), None);
        assert_eq!(map_input_to_action(InputEvent::Closed), None);
    }
}

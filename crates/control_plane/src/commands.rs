//! Shorthand operator command parsing.
//!
//! The control endpoint accepts free-text commands like `kick somePlayer` or
//! `announce maintenance in 5 minutes` and translates them into IPC messages
//! for the target server. Anything not recognized as a shorthand is passed
//! through with the first word as the message type and the remaining words
//! as arguments, keeping the IPC contract permissive.

use crate::ipc::IpcMessage;
use serde_json::json;

/// Parses a shorthand command string into an IPC message.
///
/// Returns `None` for empty input. Recognized shorthands:
///
/// * `kick <user>` — removes a player
/// * `announce <text>` — in-game announcement (text may contain spaces)
/// * `spawnnpc <type>` — spawns an NPC of the given type
///
/// Everything else becomes `{type: <first word>, data: {args: [...]}}`.
pub fn parse_operator_command(input: &str) -> Option<IpcMessage> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let (word, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (trimmed, ""),
    };

    let message = match word {
        "kick" if !rest.is_empty() => IpcMessage::new("kick", json!({ "username": rest })),
        "announce" if !rest.is_empty() => IpcMessage::announce(rest),
        "spawnnpc" if !rest.is_empty() => {
            IpcMessage::new("spawnNpc", json!({ "npcType": rest }))
        }
        _ => {
            let args: Vec<&str> = rest.split_whitespace().collect();
            IpcMessage::new(word, json!({ "args": args }))
        }
    };
    Some(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert!(parse_operator_command("").is_none());
        assert!(parse_operator_command("   ").is_none());
    }

    #[test]
    fn test_kick() {
        let msg = parse_operator_command("kick griefer42").unwrap();
        assert_eq!(msg.kind, "kick");
        assert_eq!(msg.data["username"], "griefer42");
    }

    #[test]
    fn test_announce_keeps_spaces() {
        let msg = parse_operator_command("announce restart in 5 minutes").unwrap();
        assert_eq!(msg.kind, "announce");
        assert_eq!(msg.data["message"], "restart in 5 minutes");
    }

    #[test]
    fn test_spawnnpc() {
        let msg = parse_operator_command("spawnnpc merchant").unwrap();
        assert_eq!(msg.kind, "spawnNpc");
        assert_eq!(msg.data["npcType"], "merchant");
    }

    #[test]
    fn test_passthrough() {
        let msg = parse_operator_command("setweather rain heavy").unwrap();
        assert_eq!(msg.kind, "setweather");
        assert_eq!(msg.data["args"][0], "rain");
        assert_eq!(msg.data["args"][1], "heavy");
    }

    #[test]
    fn test_bare_word_passthrough() {
        let msg = parse_operator_command("save").unwrap();
        assert_eq!(msg.kind, "save");
        assert_eq!(msg.data["args"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_kick_without_target_is_passthrough() {
        // `kick` with no user falls through to the generic form
        let msg = parse_operator_command("kick").unwrap();
        assert_eq!(msg.kind, "kick");
        assert!(msg.data.get("username").is_none());
    }
}

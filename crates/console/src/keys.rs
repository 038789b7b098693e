//! Keyboard-to-shell byte translation for the focused pane.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Translate a key event into the bytes the remote shell should receive.
///
/// Returns `None` for keys that carry no shell meaning (the app layer may
/// still consume them as local commands).
pub fn key_to_bytes(key: &KeyEvent) -> Option<Vec<u8>> {
    match key.code {
        KeyCode::Char(c) => {
            if key.modifiers.contains(KeyModifiers::CONTROL) {
                // Ctrl-A..Ctrl-Z map onto 0x01..0x1a
                let lower = c.to_ascii_lowercase();
                if lower.is_ascii_lowercase() {
                    return Some(vec![(lower as u8) - b'a' + 1]);
                }
                return None;
            }
            let mut buf = [0u8; 4];
            Some(c.encode_utf8(&mut buf).as_bytes().to_vec())
        }
        KeyCode::Enter => Some(vec![b'\r']),
        KeyCode::Backspace => Some(vec![0x7f]),
        KeyCode::Tab => Some(vec![b'\t']),
        KeyCode::Esc => Some(vec![0x1b]),
        KeyCode::Up => Some(b"\x1b[A".to_vec()),
        KeyCode::Down => Some(b"\x1b[B".to_vec()),
        KeyCode::Right => Some(b"\x1b[C".to_vec()),
        KeyCode::Left => Some(b"\x1b[D".to_vec()),
        KeyCode::Home => Some(b"\x1b[H".to_vec()),
        KeyCode::End => Some(b"\x1b[F".to_vec()),
        KeyCode::Delete => Some(b"\x1b[3~".to_vec()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    #[test]
    fn test_plain_characters() {
        assert_eq!(key_to_bytes(&key(KeyCode::Char('a'))), Some(vec![b'a']));
        assert_eq!(key_to_bytes(&key(KeyCode::Char('Z'))), Some(vec![b'Z']));
    }

    #[test]
    fn test_utf8_characters() {
        assert_eq!(
            key_to_bytes(&key(KeyCode::Char('é'))),
            Some("é".as_bytes().to_vec())
        );
    }

    #[test]
    fn test_control_characters() {
        assert_eq!(key_to_bytes(&ctrl('c')), Some(vec![0x03]));
        assert_eq!(key_to_bytes(&ctrl('d')), Some(vec![0x04]));
        assert_eq!(key_to_bytes(&ctrl('Z')), Some(vec![0x1a]));
    }

    #[test]
    fn test_editing_keys() {
        assert_eq!(key_to_bytes(&key(KeyCode::Enter)), Some(vec![b'\r']));
        assert_eq!(key_to_bytes(&key(KeyCode::Backspace)), Some(vec![0x7f]));
        assert_eq!(key_to_bytes(&key(KeyCode::Tab)), Some(vec![b'\t']));
        assert_eq!(key_to_bytes(&key(KeyCode::Esc)), Some(vec![0x1b]));
    }

    #[test]
    fn test_arrow_keys() {
        assert_eq!(key_to_bytes(&key(KeyCode::Up)), Some(b"\x1b[A".to_vec()));
        assert_eq!(key_to_bytes(&key(KeyCode::Down)), Some(b"\x1b[B".to_vec()));
        assert_eq!(key_to_bytes(&key(KeyCode::Right)), Some(b"\x1b[C".to_vec()));
        assert_eq!(key_to_bytes(&key(KeyCode::Left)), Some(b"\x1b[D".to_vec()));
    }

    #[test]
    fn test_unmapped_keys() {
        assert_eq!(key_to_bytes(&key(KeyCode::F(5))), None);
        assert_eq!(key_to_bytes(&key(KeyCode::PageUp)), None);
    }
}

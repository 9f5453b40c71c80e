/// Turn command text with backslash escapes into raw bytes
///
/// Understands `\r`, `\n`, `\t`, `\e` (ESC), `\0`, `\\` and `\xNN`. Anything
/// else after a backslash, including a malformed hex escape, is kept as
/// typed.
pub fn parse_escapes(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut rest = bytes;

    while let Some((&first, tail)) = rest.split_first() {
        if first != b'\\' {
            out.push(first);
            rest = tail;
            continue;
        }

        let (value, used) = match tail {
            [b'r', ..] => (Some(crate::CR), 1),
            [b'n', ..] => (Some(crate::LF), 1),
            [b't', ..] => (Some(b'\t'), 1),
            [b'e', ..] => (Some(crate::ESC), 1),
            [b'0', ..] => (Some(0), 1),
            [b'\\', ..] => (Some(b'\\'), 1),
            [b'x' | b'X', hi, lo, ..] => (hex_pair(*hi, *lo), 3),
            _ => (None, 0),
        };

        match value {
            Some(byte) => {
                out.push(byte);
                rest = &tail[used..];
            }
            None => {
                out.push(b'\\');
                rest = tail;
            }
        }
    }
    out
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let digit = |c: u8| (c as char).to_digit(16);
    Some((digit(hi)? * 16 + digit(lo)?) as u8)
}

//! Backend strings (task names, tags, error bodies) end up in the terminal.
//! Strip anything that could drive it.

/// Upper bound for one displayed field.
pub const MAX_FIELD_CHARS: usize = 512;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Scan {
    Text,
    /// Just saw ESC.
    Escape,
    /// `ESC [` ... final byte.
    Csi,
    /// OSC/DCS/PM/APC payload, ended by BEL (OSC only) or `ESC \`.
    Payload { bel_ends: bool },
    PayloadEscape { bel_ends: bool },
}

fn is_bidi_control(c: char) -> bool {
    matches!(
        c,
        '\u{061C}' | '\u{200E}' | '\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}'
    )
}

/// Single-line, control-free rendition of `input`, at most `max_chars`
/// visible characters followed by `...` when cut.
pub fn sanitize_field(input: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(input.len().min(max_chars + 3));
    let mut kept = 0usize;
    let mut scan = Scan::Text;

    for c in input.chars() {
        scan = match scan {
            Scan::Escape => match c {
                '[' => Scan::Csi,
                ']' => Scan::Payload { bel_ends: true },
                'P' | 'X' | '^' | '_' => Scan::Payload { bel_ends: false },
                _ => Scan::Text,
            },
            Scan::Csi if ('@'..='~').contains(&c) => Scan::Text,
            Scan::Csi => Scan::Csi,
            Scan::Payload { bel_ends } => match c {
                '\x07' if bel_ends => Scan::Text,
                '\x1b' => Scan::PayloadEscape { bel_ends },
                _ => Scan::Payload { bel_ends },
            },
            Scan::PayloadEscape { bel_ends } => match c {
                '\\' => Scan::Text,
                '\x1b' => Scan::PayloadEscape { bel_ends },
                _ => Scan::Payload { bel_ends },
            },
            Scan::Text => {
                if c == '\x1b' {
                    Scan::Escape
                } else {
                    let shown = match c {
                        '\t' | '\n' | '\r' => Some(' '),
                        c if c.is_control() || is_bidi_control(c) => None,
                        c => Some(c),
                    };
                    if let Some(c) = shown {
                        if kept == max_chars {
                            out.push_str("...");
                            return out;
                        }
                        out.push(c);
                        kept += 1;
                    }
                    Scan::Text
                }
            }
        };
    }
    out
}

pub fn sanitize(input: &str) -> String {
    sanitize_field(input, MAX_FIELD_CHARS)
}

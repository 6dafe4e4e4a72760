//! Text normalization — the first preprocessing step.
//!
//! Order matters for idempotence: NFKC first, then control/zero-width
//! stripping, then whitespace collapsing, then repeated-character
//! collapsing. Running the pipeline on its own output is a no-op.

use unicode_normalization::UnicodeNormalization;

/// Whitespace runs of this length or more collapse to a single space.
const WHITESPACE_RUN: usize = 3;

/// A character repeated this many times or more is reduced to two copies.
const REPEAT_RUN: usize = 5;

/// Zero-width marks stripped from input.
fn is_zero_width(c: char) -> bool {
    matches!(c, '\u{200B}'..='\u{200D}' | '\u{FEFF}')
}

/// C0 control characters are stripped, except tab and newline.
fn is_stripped_control(c: char) -> bool {
    c.is_control() && c != '\t' && c != '\n'
}

/// Normalize a raw message. Returns the normalized text and whether any
/// repeated-character run was collapsed.
pub fn normalize(input: &str) -> (String, bool) {
    // NFKC unification, then drop controls and zero-width marks.
    let cleaned: String = input
        .nfkc()
        .filter(|&c| !is_stripped_control(c) && !is_zero_width(c))
        .collect();

    // Collapse whitespace runs of WHITESPACE_RUN or more to one space.
    let mut collapsed = String::with_capacity(cleaned.len());
    let mut run: Vec<char> = Vec::new();
    for c in cleaned.chars() {
        if c.is_whitespace() {
            run.push(c);
        } else {
            flush_whitespace(&mut collapsed, &run);
            run.clear();
            collapsed.push(c);
        }
    }
    flush_whitespace(&mut collapsed, &run);

    collapse_repeats(&collapsed)
}

fn flush_whitespace(out: &mut String, run: &[char]) {
    if run.len() >= WHITESPACE_RUN {
        out.push(' ');
    } else {
        out.extend(run.iter());
    }
}

/// Reduce any character repeated `REPEAT_RUN`+ times to two copies.
fn collapse_repeats(input: &str) -> (String, bool) {
    let mut out = String::with_capacity(input.len());
    let mut collapsed_any = false;

    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        let mut count = 1;
        while chars.peek() == Some(&c) {
            chars.next();
            count += 1;
        }
        if count >= REPEAT_RUN {
            out.push(c);
            out.push(c);
            collapsed_any = true;
        } else {
            for _ in 0..count {
                out.push(c);
            }
        }
    }

    (out, collapsed_any)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_controls_but_keeps_tab_and_newline() {
        let (text, _) = normalize("a\u{0000}b\tc\nd\u{0007}e");
        assert_eq!(text, "ab\tc\nde");
    }

    #[test]
    fn strips_zero_width_marks() {
        let (text, _) = normalize("ho\u{200B}la\u{FEFF}");
        assert_eq!(text, "hola");
    }

    #[test]
    fn collapses_long_whitespace_runs() {
        let (text, _) = normalize("hola      mundo");
        assert_eq!(text, "hola mundo");
        // Short runs survive untouched.
        let (text, _) = normalize("hola  mundo");
        assert_eq!(text, "hola  mundo");
    }

    #[test]
    fn collapses_repeated_characters() {
        let (text, repeated) = normalize("holaaaaaa");
        assert_eq!(text, "holaa");
        assert!(repeated);

        let (text, repeated) = normalize("hoooola");
        assert_eq!(text, "hoooola");
        assert!(!repeated);
    }

    #[test]
    fn nfkc_unifies_compatibility_forms() {
        // Fullwidth letters fold to ASCII under NFKC.
        let (text, _) = normalize("ｈｏｌａ");
        assert_eq!(text, "hola");
    }

    #[test]
    fn normalization_is_idempotent() {
        for input in [
            "hola      mundo",
            "holaaaaaaa!!!!!!!",
            "  a\u{0000}b\u{200B}  c  ",
            "¿Cuál es la capital de Francia?",
            "ｈｏｌａ\t\t\t\tmundo",
        ] {
            let (once, _) = normalize(input);
            let (twice, repeated) = normalize(&once);
            assert_eq!(once, twice, "input {input:?}");
            assert!(!repeated, "second pass must find nothing to collapse");
        }
    }
}

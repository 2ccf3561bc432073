//! Splits ERB text into literal text and embedded code.

use snafu::{OptionExt, Snafu};

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("tag opened on line {line} is never closed"))]
    UnclosedTag { line: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Text(String),

    /// `<%= code %>`
    Output { code: String, line: usize },

    /// `<% code %>`
    Code { code: String, line: usize },
}

#[derive(Clone, Copy)]
enum TagKind {
    Output,
    Code,
    Comment,
}

/// Splits `template` into segments.
///
/// `<%-` strips the blanks preceding the tag when nothing else precedes it on
/// its line. `-%>` drops the newline following the tag, `<%%` is a literal
/// `<%`.
pub fn split(template: &str) -> Result<Vec<Segment>, Error> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut rest = template;
    let mut line = 1;
    // Whether `text` starts at the beginning of a line.
    let mut line_start = true;

    while let Some(start) = rest.find("<%") {
        let (before, tag) = rest.split_at(start);
        text.push_str(before);
        line += count_lines(before);

        if let Some(after) = tag.strip_prefix("<%%") {
            text.push_str("<%");
            rest = after;
            continue;
        }

        let tag_line = line;
        let body = &tag[2..];
        let (kind, body) = match body.as_bytes().first() {
            Some(b'=') => (TagKind::Output, &body[1..]),
            Some(b'#') => (TagKind::Comment, &body[1..]),
            Some(b'-') => {
                let trimmed = text.trim_end_matches([' ', '\t']);
                let strip = trimmed.ends_with('\n') || (trimmed.is_empty() && line_start);
                let len = trimmed.len();
                if strip {
                    text.truncate(len);
                }
                (TagKind::Code, &body[1..])
            }
            _ => (TagKind::Code, body),
        };

        let end = body.find("%>").context(UnclosedTagSnafu { line: tag_line })?;
        let mut code = &body[..end];
        let mut after = &body[end + 2..];
        line += count_lines(code);

        line_start = false;
        if let Some(trimmed) = code.strip_suffix('-') {
            code = trimmed;
            if let Some(stripped) = after
                .strip_prefix("\r\n")
                .or_else(|| after.strip_prefix('\n'))
            {
                after = stripped;
                line += 1;
                line_start = true;
            }
        }

        if !text.is_empty() {
            segments.push(Segment::Text(std::mem::take(&mut text)));
        }

        let code = code.trim().to_owned();
        match kind {
            TagKind::Output => segments.push(Segment::Output {
                code,
                line: tag_line,
            }),
            TagKind::Code => segments.push(Segment::Code {
                code,
                line: tag_line,
            }),
            TagKind::Comment => {}
        }

        rest = after;
    }

    text.push_str(rest);
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }

    Ok(segments)
}

fn count_lines(text: &str) -> usize {
    text.matches('\n').count()
}

use std::fmt;

const BARE_KEYS: [&[u8]; 4] = [b"version", b"ek", b"k", b"v"];

#[derive(Debug)]
pub enum NormalizeError {
    Empty,
    Json(serde_json::Error),
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "malformed json: empty body"),
            Self::Json(err) => write!(f, "malformed json: {err}"),
        }
    }
}

impl std::error::Error for NormalizeError {}

pub fn normalize(input: &[u8]) -> Result<Vec<u8>, NormalizeError> {
    if input.iter().all(u8::is_ascii_whitespace) {
        return Err(NormalizeError::Empty);
    }

    let mut out = Vec::with_capacity(input.len() + 16);
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < input.len() {
        let b = input[i];
        out.push(b);
        i += 1;

        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' | b',' => {
                if let Some(len) = bare_key_len(&input[i..]) {
                    out.push(b'"');
                    out.extend_from_slice(&input[i..i + len]);
                    out.push(b'"');
                    i += len;
                }
            }
            _ => {}
        }
    }

    serde_json::from_slice::<serde::de::IgnoredAny>(&out).map_err(NormalizeError::Json)?;
    Ok(out)
}

fn bare_key_len(rest: &[u8]) -> Option<usize> {
    BARE_KEYS.iter().find_map(|key| {
        let tail = rest.strip_prefix(*key)?;
        (tail.first() == Some(&b':')).then_some(key.len())
    })
}

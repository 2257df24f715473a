use serde::{Deserialize, Serialize};
use std::fmt;

/// Matches `text` against a glob `pattern` where `*` matches any run of
/// characters and `?` matches exactly one.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();

    // Iterative matcher with single-star backtracking.
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < txt.len() {
        if p < pat.len() && (pat[p] == '?' || pat[p] == txt[t]) {
            p += 1;
            t += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}

/// A stream pattern: network, station, location and channel codes, each either
/// a literal or a glob. Empty codes are normalized to `*`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stream {
    pub net: String,
    pub sta: String,
    pub loc: String,
    pub cha: String,
}

impl Stream {
    pub fn new<N, S, L, C>(net: N, sta: S, loc: L, cha: C) -> Self
    where
        N: Into<String>,
        S: Into<String>,
        L: Into<String>,
        C: Into<String>,
    {
        fn norm(code: String) -> String {
            if code.is_empty() { "*".into() } else { code }
        }

        Stream {
            net: norm(net.into()),
            sta: norm(sta.into()),
            loc: norm(loc.into()),
            cha: norm(cha.into()),
        }
    }

    fn fields(&self) -> [&str; 4] {
        [&self.net, &self.sta, &self.loc, &self.cha]
    }

    /// True when every field of `other` matches this pattern's glob.
    pub fn contains(&self, other: &Stream) -> bool {
        self.fields()
            .iter()
            .zip(other.fields())
            .all(|(a, b)| glob_match(a, b))
    }

    /// Symmetric overlap: for every field, at least one side matches the other
    /// when interpreted as a glob.
    pub fn overlaps(&self, other: &Stream) -> bool {
        self.fields()
            .iter()
            .zip(other.fields())
            .all(|(a, b)| glob_match(a, b) || glob_match(b, a))
    }

    /// Component-wise tightening: picks the more specific side of each field.
    /// Returns `None` when some field matches in neither direction.
    pub fn strict_match(&self, other: &Stream) -> Option<Stream> {
        fn tighter(a: &str, b: &str) -> Option<String> {
            if glob_match(a, b) {
                Some(b.to_string())
            } else if glob_match(b, a) {
                Some(a.to_string())
            } else {
                None
            }
        }

        Some(Stream {
            net: tighter(&self.net, &other.net)?,
            sta: tighter(&self.sta, &other.sta)?,
            loc: tighter(&self.loc, &other.loc)?,
            cha: tighter(&self.cha, &other.cha)?,
        })
    }

    /// Number of wildcard characters across all fields. Used to rank candidate
    /// keys by specificity.
    pub fn wildcard_count(&self) -> usize {
        self.fields()
            .iter()
            .flat_map(|f| f.chars())
            .filter(|c| *c == '*' || *c == '?')
            .count()
    }

    /// True if any field contains a `?` wildcard. Forbidden in persisted
    /// routes.
    pub fn has_question_mark(&self) -> bool {
        self.fields().iter().any(|f| f.contains('?'))
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.net, self.sta, self.loc, self.cha)
    }
}

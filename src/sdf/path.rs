//! Namespace paths.
//!
//! Paths are absolute and identify prims (`/World/Char`), properties
//! (`/World/Char.size`), and variant branches (`/World/Char{lod=high}`).

use std::fmt;

/// An absolute scene-description path.
///
/// The default value is the empty (invalid) path, used to signal "no path"
/// (e.g. a reference with no explicit target prim).
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    repr: String,
}

impl Path {
    /// Parse an absolute path. Returns `None` for malformed input.
    pub fn new(path: impl AsRef<str>) -> Option<Self> {
        let s = path.as_ref();
        if !Self::is_valid(s) {
            return None;
        }
        Some(Path { repr: s.to_string() })
    }

    fn is_valid(s: &str) -> bool {
        if s.is_empty() || !s.starts_with('/') {
            return false;
        }
        if s == "/" {
            return true;
        }
        if s.ends_with('/') {
            return false;
        }
        let mut dot_seen = false;
        let mut brace_depth = 0usize;
        let mut prev = '\0';
        for ch in s.chars() {
            match ch {
                '/' => {
                    // No empty components, no prim components after a property.
                    if prev == '/' || dot_seen {
                        return false;
                    }
                }
                '.' => {
                    if dot_seen || prev == '/' || brace_depth > 0 {
                        return false;
                    }
                    dot_seen = true;
                }
                '{' => {
                    if brace_depth > 0 || prev == '/' || dot_seen {
                        return false;
                    }
                    brace_depth += 1;
                }
                '}' => {
                    if brace_depth == 0 {
                        return false;
                    }
                    brace_depth -= 1;
                }
                _ => {}
            }
            prev = ch;
        }
        brace_depth == 0 && prev != '.'
    }

    /// The absolute root path `/`.
    pub fn abs_root() -> Self {
        Path { repr: "/".to_string() }
    }

    pub fn as_str(&self) -> &str {
        &self.repr
    }

    pub fn is_empty(&self) -> bool {
        self.repr.is_empty()
    }

    pub fn is_absolute_root_path(&self) -> bool {
        self.repr == "/"
    }

    /// True for prim and prim-variant-selection paths.
    pub fn is_prim_path(&self) -> bool {
        !self.is_empty() && !self.is_absolute_root_path() && !self.is_property_path()
    }

    pub fn is_property_path(&self) -> bool {
        self.last_element().contains('.')
    }

    /// True if the final path element carries a variant selection,
    /// e.g. `/World/Char{lod=high}`.
    pub fn is_prim_variant_selection_path(&self) -> bool {
        self.repr.ends_with('}')
    }

    fn last_element(&self) -> &str {
        match self.repr.rfind('/') {
            Some(idx) => &self.repr[idx + 1..],
            None => "",
        }
    }

    /// The name of the final path element. Empty for the root path.
    pub fn name(&self) -> &str {
        let element = self.last_element();
        match element.rfind('.') {
            Some(idx) => &element[idx + 1..],
            None => element,
        }
    }

    /// The parent path. The root path is its own parent.
    pub fn parent(&self) -> Path {
        if self.is_empty() || self.is_absolute_root_path() {
            return self.clone();
        }
        if let Some(idx) = self.repr.rfind('.') {
            return Path { repr: self.repr[..idx].to_string() };
        }
        if self.repr.ends_with('}') {
            if let Some(idx) = self.repr.rfind('{') {
                return Path { repr: self.repr[..idx].to_string() };
            }
        }
        match self.repr.rfind('/') {
            Some(0) => Path::abs_root(),
            Some(idx) => Path { repr: self.repr[..idx].to_string() },
            None => Path::abs_root(),
        }
    }

    /// The owning prim path of a property path; otherwise the path itself.
    pub fn prim_path(&self) -> Path {
        match self.repr.rfind('.') {
            Some(idx) => Path { repr: self.repr[..idx].to_string() },
            None => self.clone(),
        }
    }

    pub fn append_child(&self, name: &str) -> Path {
        debug_assert!(!self.is_property_path());
        if self.is_absolute_root_path() {
            Path { repr: format!("/{name}") }
        } else {
            Path { repr: format!("{}/{name}", self.repr) }
        }
    }

    pub fn append_property(&self, name: &str) -> Path {
        debug_assert!(!self.is_property_path());
        Path { repr: format!("{}.{name}", self.repr) }
    }

    pub fn append_variant_selection(&self, set: &str, selection: &str) -> Path {
        debug_assert!(self.is_prim_path());
        Path { repr: format!("{}{{{set}={selection}}}", self.repr) }
    }

    /// The variant selection on the final path element, if any.
    pub fn variant_selection(&self) -> Option<(&str, &str)> {
        if !self.repr.ends_with('}') {
            return None;
        }
        let open = self.repr.rfind('{')?;
        let body = &self.repr[open + 1..self.repr.len() - 1];
        let eq = body.find('=')?;
        Some((&body[..eq], &body[eq + 1..]))
    }

    /// True if `prefix` is this path or a namespace ancestor of it.
    pub fn has_prefix(&self, prefix: &Path) -> bool {
        if prefix.is_empty() || self.is_empty() {
            return false;
        }
        if prefix.is_absolute_root_path() {
            return true;
        }
        if self.repr == prefix.repr {
            return true;
        }
        match self.repr.strip_prefix(prefix.repr.as_str()) {
            Some(rest) => rest.starts_with(['/', '.', '{']),
            None => false,
        }
    }

    /// Substitute `old` for `new` at the head of this path.
    /// Returns `None` if this path does not have `old` as a prefix or if the
    /// substitution would produce a malformed path.
    pub fn replace_prefix(&self, old: &Path, new: &Path) -> Option<Path> {
        if !self.has_prefix(old) {
            return None;
        }
        if old == new {
            return Some(self.clone());
        }
        let rest = if old.is_absolute_root_path() {
            &self.repr[..]
        } else {
            &self.repr[old.repr.len()..]
        };
        if rest.is_empty() {
            return Some(new.clone());
        }
        if new.is_absolute_root_path() {
            return Path::new(rest);
        }
        Path::new(format!("{}{}", new.repr, rest))
    }

    /// All prim-level ancestors of this path, nearest first, ending at the
    /// absolute root. Does not include the path itself.
    pub fn ancestors(&self) -> Vec<Path> {
        let mut out = Vec::new();
        if self.is_empty() || self.is_absolute_root_path() {
            return out;
        }
        let mut p = self.parent();
        loop {
            let done = p.is_absolute_root_path();
            out.push(p.clone());
            if done {
                break;
            }
            p = p.parent();
        }
        out
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr)
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({})", self.repr)
    }
}

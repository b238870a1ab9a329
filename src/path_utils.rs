/// Normalise a repository file path for pattern matching: forward
/// slashes, dot segments resolved, no leading slash.
pub fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    let normalized = path.replace('\\', "/");
    for segment in normalized.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }
    segments.join("/")
}

/// All suffixes of `path`'s segment list, longest first.
pub fn suffixes(path: &str) -> Vec<&str> {
    let mut suffixes = vec![path];
    for (idx, ch) in path.char_indices() {
        if ch == '/' {
            suffixes.push(&path[idx + 1..]);
        }
    }
    suffixes
}

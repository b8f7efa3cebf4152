/// Maps a repository name onto a filesystem-safe clone directory name.
/// Every character outside `[A-Za-z0-9_-]` becomes an underscore.
pub fn sanitize_repo_dir(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

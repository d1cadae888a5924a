/// Longest error text written to a per-block log line.
pub const MAX_ERROR_LOG_LEN: usize = 200;

/// First line of an error message, cut to [`MAX_ERROR_LOG_LEN`] characters.
pub fn truncate_error(error: &impl std::fmt::Display) -> String {
    let message = error.to_string();
    let first_line = message.lines().next().unwrap_or_default();
    first_line.chars().take(MAX_ERROR_LOG_LEN).collect()
}

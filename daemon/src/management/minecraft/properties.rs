use anyhow::Context;
use std::path::Path;

pub const SERVER_PROPERTIES: &str = "server.properties";

/// Rewrites `key=value` pairs in a `.properties` text, keeping comments, ordering and
/// unrelated keys. Missing keys are appended.
pub fn apply_properties(content: &str, values: &[(&str, String)]) -> String {
    let mut seen = vec![false; values.len()];
    let mut lines: Vec<String> = content
        .lines()
        .map(|line| {
            let trimmed = line.trim_start();
            if trimmed.starts_with('#') || trimmed.starts_with('!') {
                return line.to_string();
            }
            let key = trimmed.split(['=', ':']).next().unwrap_or("").trim();
            match values.iter().position(|(k, _)| *k == key) {
                Some(i) => {
                    seen[i] = true;
                    format!("{}={}", values[i].0, values[i].1)
                }
                None => line.to_string(),
            }
        })
        .collect();

    for (i, (key, value)) in values.iter().enumerate() {
        if !seen[i] {
            lines.push(format!("{}={}", key, value));
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Writes the managed keys into `<working_dir>/server.properties`, creating it if absent.
pub async fn sync_server_properties(
    working_dir: &Path,
    values: &[(&str, String)],
) -> anyhow::Result<()> {
    let path = working_dir.join(SERVER_PROPERTIES);
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e).context(format!("failed to read {}", path.display())),
    };
    let updated = apply_properties(&content, values);
    if updated != content {
        tokio::fs::write(&path, updated)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

use std::path::Path;

use anyhow::Context;

/// Accepts the EULA in `<working_dir>/eula.txt`, generating the file if the server never ran.
pub async fn fix_eula(working_dir: &Path) -> anyhow::Result<()> {
    let eula_path = working_dir.join("eula.txt");
    let content = if eula_path.exists() {
        let content = tokio::fs::read_to_string(&eula_path)
            .await
            .with_context(|| format!("failed to read {}", eula_path.display()))?;
        let mut accepted = false;
        let mut lines = content
            .lines()
            .map(|l| {
                if l.trim_start().starts_with("eula") {
                    accepted = true;
                    "eula=true"
                } else {
                    l
                }
            })
            .collect::<Vec<_>>();
        if !accepted {
            lines.push("eula=true");
        }
        lines.join("\n") + "\n"
    } else {
        generate_eula()
    };
    tokio::fs::write(&eula_path, content.as_bytes())
        .await
        .with_context(|| format!("failed to write {}", eula_path.display()))
}

fn generate_eula() -> String {
    format!(
        "#By changing the setting below to TRUE you are indicating your agreement to our EULA (https://aka.ms/MinecraftEULA).\n#{}\neula=true\n",
        chrono::Local::now().format("%a %b %d %H:%M:%S %Z %Y")
    )
}

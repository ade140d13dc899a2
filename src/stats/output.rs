use crate::model::{StatsOutput, UserCounts, SCHEMA_VERSION};
use anyhow::Result;
use chrono::Utc;
use console::style;
use std::collections::BTreeMap;
use std::fmt::Write;

pub fn build_output(
    host: &str,
    query: Option<&str>,
    per_lang: &BTreeMap<String, u64>,
    total: u64,
    per_user: &BTreeMap<String, UserCounts>,
) -> StatsOutput {
    StatsOutput {
        version: SCHEMA_VERSION,
        generated_at: Utc::now(),
        host: host.to_string(),
        query: query.map(str::to_string),
        per_lang: per_lang.clone(),
        total,
        per_user: per_user.clone(),
    }
}

pub fn output_json(output: &StatsOutput) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(output)?);
    Ok(())
}

pub fn output_text(output: &StatsOutput) -> Result<()> {
    print!("{}", render_text(output));
    Ok(())
}

pub fn render_text(output: &StatsOutput) -> String {
    if output.total == 0 {
        return "Empty statistics, try changing --query, --lang or --user\n".to_string();
    }

    let mut txt = String::new();
    let _ = writeln!(txt, "{}", style("Languages:").bold());
    for (language, n) in &output.per_lang {
        let _ = writeln!(txt, "  - {language}: {n}");
    }
    let _ = writeln!(txt, "  - Total: {}", output.total);

    let _ = writeln!(txt, "{}", style("Users:").bold());
    for (user, counts) in &output.per_user {
        let _ = writeln!(txt, "  - {}:", style(user).green());
        for (language, n) in &counts.per_lang {
            let _ = writeln!(txt, "    - {language}: {n}");
        }
        let _ = writeln!(txt, "    - Total: {}", counts.total);
    }
    txt
}

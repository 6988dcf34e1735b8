//! `mydocker ps` — list containers.

use std::path::Path;

use anyhow::Result;

use crate::client::DaemonClient;

/// Executes the ps command.
pub async fn execute(socket: &Path) -> Result<()> {
    let client = DaemonClient::with_socket(socket);
    let containers = client.list_containers().await?;

    println!(
        "{:<14} {:<24} {:<24} {:<9} {:<16} PID",
        "CONTAINER ID", "IMAGE", "COMMAND", "STATUS", "CREATED"
    );
    for container in containers {
        println!(
            "{:<14} {:<24} {:<24} {:<9} {:<16} {}",
            container.id,
            container.image,
            container.command,
            container.status,
            format_time_since(container.created),
            container.pid,
        );
    }

    Ok(())
}

/// Renders a unix timestamp as "n units ago".
fn format_time_since(created: i64) -> String {
    let seconds = (chrono::Utc::now().timestamp() - created).max(0);
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("{days} days ago")
    } else if hours > 0 {
        format!("{hours} hours ago")
    } else if minutes > 0 {
        format!("{minutes} minutes ago")
    } else {
        format!("{seconds} seconds ago")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_formatting_picks_the_largest_unit() {
        let now = chrono::Utc::now().timestamp();
        assert!(format_time_since(now).ends_with("seconds ago"));
        assert!(format_time_since(now - 90).ends_with("minutes ago"));
        assert!(format_time_since(now - 2 * 3600).ends_with("hours ago"));
        assert!(format_time_since(now - 3 * 86_400).starts_with("3 days"));
        // A clock skewed into the future does not underflow.
        assert_eq!(format_time_since(now + 100), "0 seconds ago");
    }
}

use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

/// Pids listening on `port`, via `lsof -t -i :<port>`.
async fn listeners(port: u16) -> std::io::Result<Vec<i32>> {
    let out = Command::new("lsof")
        .arg("-t")
        .arg("-i")
        .arg(format!(":{port}"))
        .kill_on_drop(true)
        .output()
        .await?;
    // lsof exits 1 when nothing matches
    Ok(parse_pids(&String::from_utf8_lossy(&out.stdout)))
}

pub(crate) fn parse_pids(stdout: &str) -> Vec<i32> {
    let own = std::process::id() as i32;
    let mut pids: Vec<i32> = stdout
        .lines()
        .filter_map(|l| l.trim().parse::<i32>().ok())
        .filter(|pid| *pid > 0 && *pid != own)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

fn alive(pid: i32) -> bool {
    // signal 0 only checks existence
    unsafe { libc::kill(pid, 0) == 0 }
}

fn signal(pid: i32, sig: libc::c_int) -> std::io::Result<()> {
    if unsafe { libc::kill(pid, sig) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Terminates whatever holds `port`: SIGTERM, wait `grace`, SIGKILL survivors.
///
/// Best-effort. Every failure is logged and swallowed.
pub async fn reclaim(port: u16, grace: Duration) {
    let pids = match listeners(port).await {
        Ok(p) => p,
        Err(e) => {
            warn!(port, "failed to list processes on port: {e}");
            return;
        }
    };
    if pids.is_empty() {
        debug!(port, "port is free");
        return;
    }

    for &pid in &pids {
        info!(port, pid, "terminating process holding port");
        if let Err(e) = signal(pid, libc::SIGTERM) {
            warn!(port, pid, "SIGTERM failed: {e}");
        }
    }

    tokio::time::sleep(grace).await;

    for &pid in &pids {
        if alive(pid) {
            warn!(port, pid, "process still alive after grace period, killing");
            if let Err(e) = signal(pid, libc::SIGKILL) {
                warn!(port, pid, "SIGKILL failed: {e}");
            }
        }
    }
}

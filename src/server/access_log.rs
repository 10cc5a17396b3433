use std::{
    fmt,
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
    sync::mpsc::{self, error::TrySendError},
};

/// Per-day access log files.
///
/// One line per answered request is appended to `<root>/DD.MM/server.log`,
/// directories are created as needed:
///
/// ```text
/// 127.0.0.1 [14/11/2023:22:13:20 +0000] "GET /users/7 HTTP/1.1" 200 27 "curl/8.4.0" 3ms
/// ```
///
/// Times are UTC. Lines are handed to a single writer task, so connections
/// never wait on the disk; when the writer falls behind by more than
/// [`AccessLog::QUEUE_SIZE`] lines, new lines are dropped with a warning.
/// Failing to write a line is logged and otherwise ignored.
///
/// # Examples
/// ```no_run
/// use ember_web::{AccessLog, Server};
///
/// # fn main() {
/// let builder = Server::builder().access_log(AccessLog::new("logs"));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AccessLog {
    root: PathBuf,
}

/// Sending side of a running access log writer.
#[derive(Debug)]
pub(crate) struct AccessLogger {
    lines: mpsc::Sender<Line>,
}

#[derive(Debug)]
pub(crate) struct Line {
    day: String,
    pub(crate) text: String,
}

pub(crate) struct Entry<'a> {
    pub(crate) client_ip: &'a str,
    pub(crate) method: &'a str,
    pub(crate) path: &'a str,
    pub(crate) protocol: &'a str,
    pub(crate) status: u16,
    pub(crate) body_size: usize,
    pub(crate) user_agent: &'a str,
    pub(crate) elapsed: Duration,
}

impl AccessLog {
    pub const QUEUE_SIZE: usize = 4096;

    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Spawns the writer task; it ends once the logger is dropped.
    ///
    /// Must be called within a tokio runtime.
    pub(crate) fn spawn(self) -> AccessLogger {
        let (lines, queue) = mpsc::channel(Self::QUEUE_SIZE);
        tokio::spawn(write_lines(self.root, queue));
        AccessLogger { lines }
    }
}

impl AccessLogger {
    pub(crate) fn record(&self, entry: &Entry<'_>) {
        let now = UtcTime::from(SystemTime::now());
        let line = Line {
            day: now.day_dir(),
            text: format_line(entry, &now),
        };

        match self.lines.try_send(line) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(path = entry.path, "access log queue full, line dropped")
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!("access log writer stopped, line dropped")
            }
        }
    }
}

#[cfg(test)]
impl AccessLogger {
    /// A logger whose lines land in the returned queue instead of a file.
    pub(crate) fn capture(size: usize) -> (Self, mpsc::Receiver<Line>) {
        let (lines, queue) = mpsc::channel(size);
        (Self { lines }, queue)
    }
}

async fn write_lines(root: PathBuf, mut queue: mpsc::Receiver<Line>) {
    let mut current: Option<(String, File)> = None;

    while let Some(line) = queue.recv().await {
        if let Err(err) = append(&root, &mut current, &line).await {
            tracing::warn!(root = %root.display(), error = %err, "access log write failed");
            current = None;
        }
    }
}

async fn append(
    root: &Path,
    current: &mut Option<(String, File)>,
    line: &Line,
) -> std::io::Result<()> {
    if !matches!(current, Some((open_day, _)) if *open_day == line.day) {
        let dir = root.join(&line.day);
        fs::create_dir_all(&dir).await?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("server.log"))
            .await?;
        *current = Some((line.day.clone(), file));
    }

    let Some((_, file)) = current else {
        return Ok(());
    };
    file.write_all(line.text.as_bytes()).await?;
    file.flush().await
}

fn format_line(entry: &Entry<'_>, time: &UtcTime) -> String {
    format!(
        "{} [{time} +0000] \"{} {} {}\" {} {} \"{}\" {}ms\n",
        entry.client_ip,
        entry.method,
        entry.path,
        entry.protocol,
        entry.status,
        entry.body_size,
        entry.user_agent,
        entry.elapsed.as_millis(),
    )
}

#[derive(Debug, PartialEq)]
struct UtcTime {
    year: i64,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
}

impl UtcTime {
    fn from_unix(secs: u64) -> Self {
        let days = (secs / 86_400) as i64;
        let rem = (secs % 86_400) as u32;

        // Days since 1970-01-01 to a proleptic Gregorian date
        let z = days + 719_468;
        let era = z.div_euclid(146_097);
        let doe = z.rem_euclid(146_097);
        let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
        let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
        let year = yoe + era * 400 + i64::from(month <= 2);

        Self {
            year,
            month,
            day,
            hour: rem / 3600,
            minute: rem % 3600 / 60,
            second: rem % 60,
        }
    }

    fn day_dir(&self) -> String {
        format!("{:02}.{:02}", self.day, self.month)
    }
}

impl From<SystemTime> for UtcTime {
    fn from(time: SystemTime) -> Self {
        let secs = time
            .duration_since(UNIX_EPOCH)
            .map(|since| since.as_secs())
            .unwrap_or(0);
        Self::from_unix(secs)
    }
}

impl fmt::Display for UtcTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}/{:02}/{:04}:{:02}:{:02}:{:02}",
            self.day, self.month, self.year, self.hour, self.minute, self.second
        )
    }
}

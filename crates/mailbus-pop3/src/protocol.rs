//! POP3 protocol session (RFC 1939): USER/PASS, STAT, UIDL, LIST, RETR, QUIT

use async_std::io::prelude::*;
use async_std::io::{BufReader, Read, Write};
use tracing::debug;

use crate::{Pop3Error, Pop3Result};

/// Check a status line, returning the text after "+OK"
pub fn check_ok(line: &str) -> Pop3Result<&str> {
    line.strip_prefix("+OK")
        .map(str::trim)
        .ok_or_else(|| Pop3Error::ServerError(line.trim().to_string()))
}

/// Parse a STAT answer ("+OK count size")
pub fn parse_stat(line: &str) -> Pop3Result<(usize, u64)> {
    let rest = check_ok(line)?;
    let mut parts = rest.split_whitespace();
    let count = parts.next().and_then(|s| s.parse().ok());
    let size = parts.next().and_then(|s| s.parse().ok());
    match (count, size) {
        (Some(count), Some(size)) => Ok((count, size)),
        _ => Err(Pop3Error::ServerError(format!("Malformed STAT answer: {}", line))),
    }
}

/// Parse one line of a UIDL or LIST listing ("msg-number value")
pub fn parse_listing_line(line: &str) -> Option<(u32, String)> {
    let mut parts = line.split_whitespace();
    let number = parts.next()?.parse().ok().filter(|n| *n > 0)?;
    let value = parts.next()?.to_string();
    Some((number, value))
}

/// Remove the byte-stuffing of a multi-line response line
pub fn unstuff(line: &[u8]) -> &[u8] {
    if line.starts_with(b"..") {
        &line[1..]
    } else {
        line
    }
}

fn is_terminator(line: &[u8]) -> bool {
    line == b".\r\n" || line == b".\n" || line == b"."
}

/// Connected POP3 session in the TRANSACTION state once logged in
pub struct Pop3Session<S> {
    stream: BufReader<S>,
    debug: bool,
}

impl<S> Pop3Session<S>
where
    S: Read + Write + Unpin,
{
    /// Wrap a connected stream and read the server greeting
    pub async fn open(stream: S, debug: bool) -> Pop3Result<Self> {
        let mut session = Self {
            stream: BufReader::new(stream),
            debug,
        };
        let greeting = session.read_line().await?;
        check_ok(&greeting)?;
        Ok(session)
    }

    /// USER then PASS
    pub async fn login(&mut self, username: &str, password: &str) -> Pop3Result<()> {
        self.command(&format!("USER {}", username), None)
            .await
            .map_err(|e| Pop3Error::AuthenticationFailed(e.to_string()))?;
        self.command(&format!("PASS {}", password), Some("PASS ****"))
            .await
            .map_err(|e| Pop3Error::AuthenticationFailed(e.to_string()))?;
        Ok(())
    }

    /// Message count and maildrop size
    pub async fn stat(&mut self) -> Pop3Result<(usize, u64)> {
        let line = self.command("STAT", None).await?;
        parse_stat(&line)
    }

    /// Unique ids of every message, by message number
    pub async fn uidl(&mut self) -> Pop3Result<Vec<(u32, String)>> {
        self.command("UIDL", None).await?;
        self.read_listing().await
    }

    /// Message numbers of every message
    pub async fn list(&mut self) -> Pop3Result<Vec<u32>> {
        self.command("LIST", None).await?;
        Ok(self
            .read_listing()
            .await?
            .into_iter()
            .map(|(number, _size)| number)
            .collect())
    }

    /// Full message source
    pub async fn retr(&mut self, number: u32) -> Pop3Result<Vec<u8>> {
        self.command(&format!("RETR {}", number), None).await?;

        let mut message = Vec::new();
        loop {
            let line = self.read_raw_line().await?;
            if is_terminator(&line) {
                break;
            }
            message.extend_from_slice(unstuff(&line));
        }
        Ok(message)
    }

    /// End the session
    pub async fn quit(&mut self) -> Pop3Result<()> {
        self.command("QUIT", None).await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn into_inner(self) -> S {
        self.stream.into_inner()
    }

    /// Send a command and check its status line. `logged` replaces the
    /// command text in debug output.
    async fn command(&mut self, command: &str, logged: Option<&str>) -> Pop3Result<String> {
        if self.debug {
            debug!("C: {}", logged.unwrap_or(command));
        }
        let stream = self.stream.get_mut();
        stream.write_all(command.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;

        let line = self.read_line().await?;
        check_ok(&line)?;
        Ok(line)
    }

    async fn read_listing(&mut self) -> Pop3Result<Vec<(u32, String)>> {
        let mut entries = Vec::new();
        loop {
            let line = self.read_raw_line().await?;
            if is_terminator(&line) {
                break;
            }
            let line = String::from_utf8_lossy(&line);
            match parse_listing_line(&line) {
                Some(entry) => entries.push(entry),
                None => debug!("Ignoring listing line: {}", line.trim_end()),
            }
        }
        Ok(entries)
    }

    async fn read_line(&mut self) -> Pop3Result<String> {
        let raw = self.read_raw_line().await?;
        let line = String::from_utf8_lossy(&raw).trim_end().to_string();
        if self.debug {
            debug!("S: {}", line);
        }
        Ok(line)
    }

    async fn read_raw_line(&mut self) -> Pop3Result<Vec<u8>> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Err(Pop3Error::ConnectionClosed);
        }
        Ok(buf)
    }
}

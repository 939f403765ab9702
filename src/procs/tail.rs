// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::io::{self, SeekFrom, Write};
use std::path::Path;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::procs::logger::LogPresenter;
use crate::Error;

const CHUNK_SIZE: usize = 4096;
const FOLLOW_INTERVAL: Duration = Duration::from_millis(200);

/// Byte offset of the first of the last `lines` lines of `file`
///
/// A trailing newline does not start an empty last line.
pub async fn last_lines_offset(file: &mut File, lines: usize) -> io::Result<u64> {
    let len = file.metadata().await?.len();
    if lines == 0 {
        return Ok(len);
    }

    let mut pos = len;
    let mut newlines = 0;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut last_byte = true;

    while pos > 0 {
        let chunk = std::cmp::min(pos, CHUNK_SIZE as u64) as usize;
        pos -= chunk as u64;

        file.seek(SeekFrom::Start(pos)).await?;
        file.read_exact(&mut buf[..chunk]).await?;

        for (i, b) in buf[..chunk].iter().enumerate().rev() {
            if *b != b'\n' {
                last_byte = false;
                continue;
            }

            if last_byte {
                last_byte = false;
                continue;
            }

            newlines += 1;
            if newlines == lines {
                return Ok(pos + i as u64 + 1);
            }
        }
    }

    Ok(0)
}

/// Copies the last `lines` lines of the log at `path` to `out`
///
/// With `follow` this never returns on success, new bytes are forwarded as they are appended. A
///  file shrinking below the read position is treated as truncated and read again from the start.
pub async fn tail<W: Write>(
    path: &Path,
    lines: usize,
    follow: bool,
    out: &mut LogPresenter<W>,
) -> Result<(), Error> {
    let mut file = File::open(path)
        .await
        .map_err(|e| Error::from(format!("failed to open log {}: {}", path.display(), e)))?;

    let mut pos = last_lines_offset(&mut file, lines).await?;
    file.seek(SeekFrom::Start(pos)).await?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let read = file.read(&mut buf).await?;
        if read > 0 {
            pos += read as u64;
            out.write_all(&buf[..read])?;
            continue;
        }

        if !follow {
            out.finish()?;
            return Ok(());
        }
        out.flush()?;

        tokio::time::sleep(FOLLOW_INTERVAL).await;

        let len = file.metadata().await?.len();
        if len < pos {
            pos = file.seek(SeekFrom::Start(0)).await?;
        }
    }
}

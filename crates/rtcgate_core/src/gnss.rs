/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Latest GNSS fix decoded from NMEA GGA sentences.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, error, info};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub has_fix: bool,
}

#[derive(Default)]
pub struct LocationProvider {
    current: Mutex<Location>,
}

impl LocationProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_location(&self) -> Location {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Feeds one NMEA line. Returns true when it produced a new fix.
    pub fn ingest_line(&self, line: &str) -> bool {
        let Some(loc) = parse_gga(line) else {
            return false;
        };
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = loc;
        debug!(lat = loc.latitude, lon = loc.longitude, "gnss fix");
        true
    }

    /// Reads lines until EOF, a read error or shutdown. Bytes that are not
    /// UTF-8 are replaced, so line noise only costs the affected sentence.
    pub async fn run_reader<R>(&self, mut reader: R, mut shutdown: watch::Receiver<bool>)
    where
        R: AsyncBufRead + Unpin,
    {
        // Survives cancelled reads, so a partial line is kept.
        let mut buf = Vec::new();
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                read = reader.read_until(b'\n', &mut buf) => match read {
                    Ok(0) => {
                        if !buf.is_empty() {
                            self.ingest_line(String::from_utf8_lossy(&buf).trim_end());
                        }
                        info!("gnss stream ended");
                        break;
                    }
                    Ok(_) => {
                        self.ingest_line(String::from_utf8_lossy(&buf).trim_end());
                        buf.clear();
                    }
                    Err(e) => {
                        error!("gnss read failed: {e}");
                        break;
                    }
                },
            }
        }
    }
}

/// Opens a serial device node for line reads. Baud rate and framing must
/// already be set on the device (e.g. `stty -F /dev/ttyUSB0 115200 cs8 -cstopb -parenb`).
pub async fn open_serial(path: impl AsRef<Path>) -> Result<BufReader<tokio::fs::File>> {
    let path = path.as_ref();
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("open gnss port: {}", path.display()))?;
    info!("gnss reading from {}", path.display());
    Ok(BufReader::new(file))
}

pub fn parse_gga(line: &str) -> Option<Location> {
    if !line.starts_with("$GPGGA") && !line.starts_with("$GNGGA") {
        return None;
    }
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < 7 {
        return None;
    }
    let quality = fields[6].trim();
    if quality.is_empty() || quality == "0" {
        return None;
    }
    let (raw_lat, raw_lon) = (fields[2].trim(), fields[4].trim());
    if raw_lat.is_empty() || raw_lon.is_empty() {
        return None;
    }
    Some(Location {
        latitude: decimal_degrees(raw_lat, hemisphere(fields[3]))?,
        longitude: decimal_degrees(raw_lon, hemisphere(fields[5]))?,
        has_fix: true,
    })
}

fn hemisphere(field: &str) -> char {
    field.trim().chars().next().unwrap_or(' ')
}

/// `DDMM.MMMM` / `DDDMM.MMMM` to signed decimal degrees.
pub fn decimal_degrees(raw: &str, dir: char) -> Option<f64> {
    let dot = raw.find('.')?;
    if dot <= 2 {
        return None;
    }
    let (deg, min) = raw.split_at(dot - 2);
    let value = deg.parse::<f64>().ok()? + min.parse::<f64>().ok()? / 60.0;
    Some(if matches!(dir, 'S' | 'W') { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn coordinates_decode_to_decimal_degrees() {
        assert!(close(decimal_degrees("4807.038", 'N').unwrap(), 48.0 + 7.038 / 60.0));
        assert!(close(decimal_degrees("4807.038", 'S').unwrap(), -(48.0 + 7.038 / 60.0)));
        assert!(close(decimal_degrees("01131.000", 'E').unwrap(), 11.0 + 31.0 / 60.0));
        assert!(close(decimal_degrees("12345.67", 'W').unwrap(), -(123.0 + 45.67 / 60.0)));
        assert!(decimal_degrees("4807", 'N').is_none());
        assert!(decimal_degrees("07.5", 'N').is_none());
        assert!(decimal_degrees("48x7.0", 'N').is_none());
    }

    #[test]
    fn gga_sentence_updates_location() {
        let provider = LocationProvider::new();
        assert_eq!(provider.get_location(), Location::default());
        assert!(provider.ingest_line(
            "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47"
        ));
        let loc = provider.get_location();
        assert!(loc.has_fix);
        assert!(close(loc.latitude, 48.0 + 7.038 / 60.0));
        assert!(close(loc.longitude, 11.0 + 31.0 / 60.0));
    }

    #[test]
    fn gngga_with_southern_western_fix() {
        let loc = parse_gga("$GNGGA,000001,3351.000,S,15112.000,W,2,10,1.0,10.0,M,0.0,M,,*00").unwrap();
        assert!(close(loc.latitude, -(33.0 + 51.0 / 60.0)));
        assert!(close(loc.longitude, -(151.0 + 12.0 / 60.0)));
    }

    #[test]
    fn sentences_without_fix_are_ignored() {
        let provider = LocationProvider::new();
        provider.ingest_line("$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47");
        let before = provider.get_location();

        assert!(!provider.ingest_line("$GPGGA,123520,4900.000,N,01200.000,E,0,00,,,M,,M,,*47"));
        assert!(!provider.ingest_line("$GPGGA,123520,4900.000,N,01200.000,E,,00,,,M,,M,,*47"));
        assert!(!provider.ingest_line("$GPGGA,123520,,N,,E,1,08,0.9,545.4,M,46.9,M,,*47"));
        assert!(!provider.ingest_line("$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A"));
        assert!(!provider.ingest_line("$GPGGA,123519,4807.038,N"));
        assert_eq!(provider.get_location(), before);
    }

    #[tokio::test]
    async fn reader_consumes_stream_until_eof() {
        let provider = LocationProvider::new();
        let data: &[u8] = b"garbage\r\n$GPGGA,1,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";
        let (_tx, rx) = watch::channel(false);
        tokio::time::timeout(Duration::from_secs(2), provider.run_reader(data, rx))
            .await
            .unwrap();
        assert!(provider.get_location().has_fix);
    }

    #[tokio::test]
    async fn line_noise_does_not_stop_the_reader() {
        let provider = LocationProvider::new();
        let data: &[u8] =
            b"\xff\xfe noise\r\n$GPGGA,1,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";
        let (_tx, rx) = watch::channel(false);
        tokio::time::timeout(Duration::from_secs(2), provider.run_reader(data, rx))
            .await
            .unwrap();
        assert!(provider.get_location().has_fix);
    }

    #[tokio::test]
    async fn last_line_without_newline_is_read() {
        let provider = LocationProvider::new();
        let data: &[u8] = b"$GPGGA,1,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
        let (_tx, rx) = watch::channel(false);
        tokio::time::timeout(Duration::from_secs(2), provider.run_reader(data, rx))
            .await
            .unwrap();
        assert!(provider.get_location().has_fix);
    }

    #[tokio::test]
    async fn reader_stops_on_shutdown() {
        let provider = LocationProvider::new();
        let (_writer, reader) = tokio::io::duplex(64);
        let (tx, rx) = watch::channel(false);
        let stop = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(true);
        };
        let run = provider.run_reader(BufReader::new(reader), rx);
        tokio::time::timeout(Duration::from_secs(2), async { tokio::join!(run, stop) })
            .await
            .unwrap();
        assert!(!provider.get_location().has_fix);
    }

    #[tokio::test]
    async fn missing_serial_port_is_an_error() {
        assert!(open_serial("/nonexistent/rtcgate-gnss").await.is_err());
    }
}

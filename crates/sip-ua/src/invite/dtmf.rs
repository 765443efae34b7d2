//! DTMF over INFO (`application/dtmf-relay`)

use bytes::Bytes;
use bytesstr::BytesStr;
use sip_types::header::typed::ContentType;
use std::collections::VecDeque;
use std::time::Duration;

pub const CONTENT_TYPE_DTMF: ContentType =
    ContentType(BytesStr::from_static("application/dtmf-relay"));

const DEFAULT_DURATION_MS: u32 = 100;
const MIN_DURATION_MS: u32 = 70;
const MAX_DURATION_MS: u32 = 6000;

const DEFAULT_INTER_TONE_GAP_MS: u32 = 500;
const MIN_INTER_TONE_GAP_MS: u32 = 50;

/// The pause a `,` inserts between tones
const COMMA_PAUSE_MS: u32 = 200;

/// One queued tone with its pacing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tone {
    pub tone: char,
    pub duration_ms: u32,
    pub inter_tone_gap_ms: u32,
}

impl Tone {
    /// The INFO body for this tone
    pub fn body(&self) -> Bytes {
        Bytes::from(format!(
            "Signal={}\r\nDuration={}",
            self.tone, self.duration_ms
        ))
    }

    /// Time until the next tone may go out
    pub fn hold_off(&self) -> Duration {
        Duration::from_millis(u64::from(self.duration_ms + self.inter_tone_gap_ms))
    }
}

/// The given tone string contains an invalid character
#[derive(Debug, thiserror::Error)]
#[error("invalid DTMF tone {0:?}")]
pub struct InvalidTone(pub char);

fn valid_tone(c: char) -> bool {
    matches!(c, '0'..='9' | 'A'..='D' | '#' | '*' | ',')
}

/// Queue of tones awaiting their INFO requests.
///
/// Tones are sent one at a time, the next one after the previous tone's
/// duration plus the inter-tone gap elapsed. A `,` only inserts a pause.
#[derive(Debug, Default)]
pub struct DtmfQueue {
    queue: VecDeque<Tone>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DtmfOptions {
    pub duration_ms: Option<u32>,
    pub inter_tone_gap_ms: Option<u32>,
}

impl DtmfQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and enqueue all tones of `tones`
    pub fn enqueue(&mut self, tones: &str, options: DtmfOptions) -> Result<(), InvalidTone> {
        let tones = tones.to_ascii_uppercase();

        if let Some(invalid) = tones.chars().find(|&c| !valid_tone(c)) {
            return Err(InvalidTone(invalid));
        }

        let duration_ms = options
            .duration_ms
            .unwrap_or(DEFAULT_DURATION_MS)
            .clamp(MIN_DURATION_MS, MAX_DURATION_MS);

        let inter_tone_gap_ms = options
            .inter_tone_gap_ms
            .unwrap_or(DEFAULT_INTER_TONE_GAP_MS)
            .max(MIN_INTER_TONE_GAP_MS);

        for tone in tones.chars() {
            self.queue.push_back(Tone {
                tone,
                duration_ms,
                inter_tone_gap_ms,
            });
        }

        Ok(())
    }

    /// Next tone to put on the wire.
    ///
    /// Pauses are consumed here and merged into the wait of the
    /// following tone; they never produce an INFO.
    pub fn next_tone(&mut self) -> Option<(Tone, Duration)> {
        let mut pause = Duration::ZERO;

        while let Some(tone) = self.queue.pop_front() {
            if tone.tone == ',' {
                pause += Duration::from_millis(u64::from(COMMA_PAUSE_MS));
                continue;
            }

            let hold_off = tone.hold_off() + pause;

            return Some((tone, hold_off));
        }

        None
    }

    /// Drop everything, used when the session failed
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Parse the `Signal`/`Duration` lines of an incoming INFO body
pub fn parse_dtmf_body(body: &[u8]) -> Option<Tone> {
    let body = std::str::from_utf8(body).ok()?;

    let mut signal = None;
    let mut duration = DEFAULT_DURATION_MS;

    for line in body.lines() {
        let (name, value) = line.split_once('=')?;

        match name.trim().to_ascii_lowercase().as_str() {
            "signal" => {
                let value = value.trim();

                let c = value.chars().next()?.to_ascii_uppercase();

                if value.chars().count() != 1 || !valid_tone(c) || c == ',' {
                    return None;
                }

                signal = Some(c);
            }
            "duration" => {
                duration = value.trim().parse().ok()?;
            }
            _ => {}
        }
    }

    Some(Tone {
        tone: signal?,
        duration_ms: duration,
        inter_tone_gap_ms: 0,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn enqueue_validates_tones() {
        let mut queue = DtmfQueue::new();

        assert!(queue.enqueue("12x", DtmfOptions::default()).is_err());
        assert!(queue.is_empty());

        queue.enqueue("1a#", DtmfOptions::default()).unwrap();

        let (tone, _) = queue.next_tone().unwrap();
        assert_eq!(tone.tone, '1');
        assert_eq!(tone.duration_ms, 100);

        let (tone, _) = queue.next_tone().unwrap();
        assert_eq!(tone.tone, 'A');
    }

    #[test]
    fn durations_are_clamped() {
        let mut queue = DtmfQueue::new();

        queue
            .enqueue(
                "1",
                DtmfOptions {
                    duration_ms: Some(10),
                    inter_tone_gap_ms: Some(10),
                },
            )
            .unwrap();

        let (tone, hold_off) = queue.next_tone().unwrap();

        assert_eq!(tone.duration_ms, 70);
        assert_eq!(tone.inter_tone_gap_ms, 50);
        assert_eq!(hold_off, Duration::from_millis(120));
    }

    #[test]
    fn comma_is_a_pause_not_a_tone() {
        let mut queue = DtmfQueue::new();

        queue.enqueue("1,2", DtmfOptions::default()).unwrap();

        let (tone, _) = queue.next_tone().unwrap();
        assert_eq!(tone.tone, '1');

        // the comma extends the wait before '2' by 200ms
        let (tone, hold_off) = queue.next_tone().unwrap();
        assert_eq!(tone.tone, '2');
        assert_eq!(hold_off, Duration::from_millis(100 + 500 + 200));

        assert!(queue.next_tone().is_none());
    }

    #[test]
    fn tone_body_format() {
        let tone = Tone {
            tone: '#',
            duration_ms: 160,
            inter_tone_gap_ms: 500,
        };

        assert_eq!(&tone.body()[..], b"Signal=#\r\nDuration=160");
    }

    #[test]
    fn parse_incoming_body() {
        let tone = parse_dtmf_body(b"Signal=5\r\nDuration=220").unwrap();

        assert_eq!(tone.tone, '5');
        assert_eq!(tone.duration_ms, 220);

        assert!(parse_dtmf_body(b"Signal=,\r\nDuration=100").is_none());
        assert!(parse_dtmf_body(b"Signal=12\r\nDuration=100").is_none());
    }
}

use crate::alignment::transcript::Transcript;
use crate::types::{AsrSegment, AsrToken, AudioFile, FileTranscription};

pub(crate) const WORD_SECS: f64 = 0.3;

/// One audio file per entry; every whitespace word becomes a 0.3s token and
/// every `|` starts a new ASR segment.
pub(crate) fn transcript_from_files(files: &[&str]) -> Transcript {
    let mut audio_files = Vec::new();
    let mut transcriptions = Vec::new();
    let mut file_start = 0.0;
    for (audio_file, text) in files.iter().enumerate() {
        let mut time = 0.0;
        let mut segments = Vec::new();
        for segment_text in text.split('|') {
            let tokens: Vec<AsrToken> = segment_text
                .split_whitespace()
                .map(|word| {
                    let token = AsrToken {
                        text: word.to_string(),
                        start: time,
                        end: time + WORD_SECS,
                        voice_length: None,
                        confidence: Some(0.9),
                        refined: None,
                    };
                    time += WORD_SECS;
                    token
                })
                .collect();
            if tokens.is_empty() {
                continue;
            }
            segments.push(AsrSegment {
                text: segment_text.trim().to_string(),
                start: tokens[0].start,
                end: tokens[tokens.len() - 1].end,
                tokens,
            });
        }
        audio_files.push(AudioFile {
            id: format!("part{audio_file:02}"),
            start: file_start,
            end: file_start + time,
        });
        file_start += time;
        transcriptions.push(FileTranscription {
            audio_file,
            segments,
        });
    }
    Transcript::build(audio_files, &transcriptions).expect("test transcript builds")
}

pub(crate) fn transcript_from_text(text: &str) -> Transcript {
    transcript_from_files(&[text])
}

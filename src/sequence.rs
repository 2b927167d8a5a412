//! Score data: an indexed, looping list of measures.

use crate::types::NoteInstruction;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Deterministic source of measures. The scheduler wraps indices modulo `len()`.
pub trait MeasureSource: Send {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notes of measure `index` (`index < len()`), offsets relative to the measure.
    fn measure(&self, index: usize) -> Vec<NoteInstruction>;
}

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("read score: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse score: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("score has no measures")]
    Empty,
    #[error("measure {measure}: note {note} ends before it starts")]
    InvertedNote { measure: usize, note: usize },
}

/// A fixed score loaded from JSON or built in code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub name: String,
    pub measures: Vec<Vec<NoteInstruction>>,
}

impl Score {
    pub fn new(name: impl Into<String>, measures: Vec<Vec<NoteInstruction>>) -> Result<Self, ScoreError> {
        let score = Self {
            name: name.into(),
            measures,
        };
        score.check()?;
        Ok(score)
    }

    pub fn load(path: &Path) -> Result<Self, ScoreError> {
        let data = std::fs::read_to_string(path)?;
        let score: Score = serde_json::from_str(&data)?;
        score.check()?;
        info!("Loaded score {:?} ({} measures) from {:?}", score.name, score.measures.len(), path);
        Ok(score)
    }

    fn check(&self) -> Result<(), ScoreError> {
        if self.measures.is_empty() {
            return Err(ScoreError::Empty);
        }
        for (m, notes) in self.measures.iter().enumerate() {
            for (n, note) in notes.iter().enumerate() {
                if note.end < note.start {
                    return Err(ScoreError::InvertedNote { measure: m, note: n });
                }
            }
        }
        Ok(())
    }

    /// Built-in loop: a slow E-minor progression, bass on the downbeat and a
    /// broken chord above it.
    pub fn demo() -> Self {
        // (bass, chord tones)
        let progression: [(i32, [i32; 3]); 8] = [
            (40, [64, 67, 71]), // Em
            (40, [64, 67, 71]),
            (36, [60, 64, 67]), // C
            (36, [60, 64, 67]),
            (43, [62, 67, 71]), // G
            (43, [62, 67, 71]),
            (38, [62, 66, 69]), // D
            (35, [63, 66, 71]), // B
        ];
        let measures = progression
            .iter()
            .map(|&(bass, chord)| {
                let mut notes = vec![NoteInstruction::new(bass, 0.0, 1.0)];
                for (i, &p) in chord.iter().enumerate() {
                    let start = 0.25 * (i as f64 + 1.0);
                    notes.push(NoteInstruction::new(p, start, start + 0.25));
                }
                notes
            })
            .collect();
        Self {
            name: "demo".into(),
            measures,
        }
    }
}

impl MeasureSource for Score {
    fn len(&self) -> usize {
        self.measures.len()
    }

    fn measure(&self, index: usize) -> Vec<NoteInstruction> {
        self.measures.get(index).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_is_well_formed() {
        let score = Score::demo();
        assert_eq!(score.len(), 8);
        assert!(score.check().is_ok());
        for i in 0..score.len() {
            let notes = score.measure(i);
            assert_eq!(notes.len(), 4);
            assert!(notes.iter().all(|n| n.start >= 0.0 && n.end <= 1.0));
        }
    }

    #[test]
    fn test_empty_score_rejected() {
        assert!(matches!(Score::new("x", vec![]), Err(ScoreError::Empty)));
    }

    #[test]
    fn test_inverted_note_rejected() {
        let err = Score::new("x", vec![vec![NoteInstruction::new(60, 0.5, 0.25)]]).unwrap_err();
        assert!(matches!(err, ScoreError::InvertedNote { measure: 0, note: 0 }));
    }

    #[test]
    fn test_load_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("score.json");
        std::fs::write(
            &path,
            r#"{"name":"two","measures":[[{"pitch":60,"start":0.0,"end":0.5}],[]]}"#,
        )
        .unwrap();
        let score = Score::load(&path).unwrap();
        assert_eq!(score.name, "two");
        assert_eq!(score.len(), 2);
        assert_eq!(score.measure(0), vec![NoteInstruction::new(60, 0.0, 0.5)]);
        assert!(score.measure(1).is_empty());
    }

    #[test]
    fn test_load_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();
        let err = Score::load(&path).unwrap_err();
        assert!(err.to_string().starts_with("parse score"));
    }
}

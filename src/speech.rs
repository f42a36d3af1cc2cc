//! Text-to-speech contract.
//!
//! The speech engine is an external collaborator; sessions that enable
//! `speak` plug an implementation in here and agents voice their answers
//! through it. No engine ships with the crate.

use async_trait::async_trait;

/// Voices an answer to the user.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn speak(&self, text: &str);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSpeech {
        spoken: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechSynthesizer for RecordingSpeech {
        async fn speak(&self, text: &str) {
            self.spoken.lock().push(text.to_string());
        }
    }

    #[tokio::test]
    async fn test_trait_is_object_safe() {
        let speech: Box<dyn SpeechSynthesizer> = Box::new(RecordingSpeech::default());
        speech.speak("we are online and ready").await;
    }
}

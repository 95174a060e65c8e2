use mrstream::{launch, Emitter, Job, Values};
use regex::Regex;
use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Mutex;

/// Counts words. Map only tallies into a combiner; MapFinal flushes it, so
/// each word leaves the map side once per run.
struct Wordcount {
    word_re: Regex,
    combiner: Mutex<HashMap<String, u64>>,
}

impl Job for Wordcount {
    fn map(&self, _key: &str, value: &str, _emitter: &dyn Emitter) {
        let mut counts = self.combiner.lock().unwrap_or_else(|e| e.into_inner());
        for cap in self.word_re.find_iter(value) {
            *counts.entry(cap.as_str().to_lowercase()).or_default() += 1;
        }
    }

    fn map_final(&self, emitter: &dyn Emitter) {
        let counts = std::mem::take(&mut *self.combiner.lock().unwrap_or_else(|e| e.into_inner()));
        for (word, n) in counts {
            emitter.emit(&word, "", &n.to_string());
        }
    }

    fn reduce(&self, word: &str, _sort_key: &str, values: Values, emitter: &dyn Emitter) {
        let sum: u64 = values.filter_map(|v| v.parse::<u64>().ok()).sum();
        emitter.emit(word, "", &sum.to_string());
    }
}

fn main() -> ExitCode {
    let word_re = match Regex::new(r"[A-Za-z0-9_']+") {
        Ok(re) => re,
        Err(e) => {
            eprintln!("word pattern: {e}");
            return ExitCode::FAILURE;
        }
    };
    launch(&Wordcount { word_re, combiner: Mutex::new(HashMap::new()) })
}

//! Flatten recognized pages into plain text.

use crate::read_api::RecognitionResult;

/// Join every line of every page, in order, with one `\n` between lines.
///
/// Page boundaries get no extra separator, and pages without lines add
/// nothing, so an empty result produces an empty string.
pub fn flatten(result: &RecognitionResult) -> String {
    let mut text = String::new();
    let lines = result.pages.iter().flat_map(|page| page.lines.iter());
    for (idx, line) in lines.enumerate() {
        if idx > 0 {
            text.push('\n');
        }
        text.push_str(&line.text);
    }
    text
}

//! # Prompt text
//!
//! One system prompt shared by every call, plus one instruction per step.
//! The instruction is sent as a second system message ahead of the turn log.

use crate::state::ConversationState;
use crate::step::{ReturnRequest, Step};

pub const SYSTEM_PROMPT: &str = "\
You are an embedded systems engineer who specializes in the ESP32 family. \
You help users check whether a set of hardware modules can share one \
communication bus on an ESP32-WROOM-32 board, and you later suggest \
application ideas that use every listed module. Be precise about part \
numbers and never invent modules the user did not mention.";

pub const COLLECT_INSTRUCTION: &str = "\
## Current step: collect inputs

Gather the user's hardware and bus choice in a structured form.

Inputs are delimited by `####` and consist of:
- a comma-separated list of specific modules (for example `bme280`, `mpu6050`, `lcd1602`)
- the preferred bus: `i2c` or `spi`
- optionally a manual review flag (`true` or `false`, default `false`)

Rules:
- At least two modules are required and each must be a concrete part number \
(`bme280`, not `temperature sensor`).
- Accept the bus case-insensitively and forgive small typos (`12c` means `i2c`). \
Any other bus is invalid.
- When something is missing or invalid, explain what is wrong and show a valid \
example such as `#### bme280, mpu6050, lcd1602 #### #### i2c ####`.
- When everything is present, repeat the inputs inside `<quotes></quotes>` and \
then return this JSON block:

```json
{
  \"component_list\": [\"module1\", \"module2\"],
  \"protocol\": \"i2c\",
  \"manual_review_flag\": false
}
```";

pub const ASK_REVIEW_INSTRUCTION: &str = "\
## Current step: manual review preference

Look at the user's most recent message. It answers whether they want to \
review compatibility results by hand before anything is finalized.

Reply with exactly one word: `yes` if they want a manual review, `no` \
otherwise. Do not add punctuation or explanation.";

const VALIDATE_INSTRUCTION: &str = "\
## Current step: validate components against the bus

For each module in the collected list:
- name its native interface(s);
- decide whether it works on the selected bus;
- if it does not, propose a common bridge part when one exists (`PCF8574` \
I/O expander, `PCA9685` PWM driver, `ADS1115` ADC, ...), otherwise mark it \
for removal.

Also mark a module as poorly compatible when the ESP32 lacks the interface \
or when it would need too many GPIOs (for example one chip-select line per \
SPI device beyond what the board can spare). Microphones and speakers \
usually need ADC, DAC, PWM or I2S rather than I2C or SPI; call that out.

Output both:
1. A CSV table with the header \
`Component,Native Protocols,Compatible with Selected,Needs Adapter?,Suggested Adapter,Notes` \
using `Yes`/`No` and leaving cells empty when not applicable.
2. A JSON block:

```json
{
  \"validated_components\": [
    {
      \"component\": \"module1\",
      \"native_protocols\": [\"i2c\"],
      \"compatible_with_selected\": \"Yes\",
      \"needs_adapter\": \"No\",
      \"suggested_adapter\": \"\",
      \"notes\": \"\"
    }
  ],
  \"protocol\": \"i2c\",
  \"manual_review_flag\": false
}
```

Only list modules that passed or were explicitly approved. Keep the protocol \
and manual review flag from earlier in the conversation.";

/// Instruction for `step`, specialized with what the state already knows.
///
/// Returns `None` for `Step::Done`; there is nothing left to ask.
pub fn instruction_for(state: &ConversationState) -> Option<String> {
    match state.step() {
        Step::Collect => Some(COLLECT_INSTRUCTION.to_string()),
        Step::AskReview => Some(ASK_REVIEW_INSTRUCTION.to_string()),
        Step::Validate => Some(validate_instruction(state.manual_review_requested())),
        Step::Done => None,
    }
}

/// The validation instruction with the manual review flag filled in
pub fn validate_instruction(manual_review: bool) -> String {
    let mut out = String::from(VALIDATE_INSTRUCTION);
    out.push_str(&format!("\n\nManual review requested: {}\n\n", manual_review));

    if manual_review {
        out.push_str(&format!(
            "If any module is incompatible, the user has been asked whether to proceed \
             with the suggested adapters, modify the component list, or try a different \
             protocol. If their latest message asks to change the list, reply with exactly \
             `{}`. If it asks to switch bus, reply with exactly `{}`. Otherwise produce the \
             table and JSON above.",
            ReturnRequest::Modify.keyword(),
            ReturnRequest::DifferentProtocol.keyword(),
        ));
    } else {
        out.push_str(
            "Remove incompatible modules that have no adapter from the JSON and say so \
             briefly. If everything is compatible, confirm success.",
        );
    }
    out
}

/// All prompts in display order, for `espcraft prompts`
pub fn catalog() -> Vec<(&'static str, String)> {
    vec![
        ("system", SYSTEM_PROMPT.to_string()),
        (Step::Collect.as_str(), COLLECT_INSTRUCTION.to_string()),
        (Step::AskReview.as_str(), ASK_REVIEW_INSTRUCTION.to_string()),
        (Step::Validate.as_str(), validate_instruction(false)),
        ("validate (manual review)", validate_instruction(true)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_per_step() {
        let state = ConversationState::new();
        assert!(instruction_for(&state).unwrap().contains("collect inputs"));

        let state = state.with_step(Step::AskReview);
        assert!(instruction_for(&state).unwrap().contains("exactly one word"));

        let state = state.with_step(Step::Done);
        assert!(instruction_for(&state).is_none());
    }

    #[test]
    fn test_validate_instruction_mentions_flag() {
        let text = validate_instruction(true);
        assert!(text.contains("Manual review requested: true"));
        assert!(text.contains("`modify`"));
        assert!(text.contains("`different protocol`"));

        let text = validate_instruction(false);
        assert!(text.contains("Manual review requested: false"));
        assert!(!text.contains("`modify`"));
    }

    #[test]
    fn test_catalog() {
        let prompts = catalog();
        assert_eq!(prompts.len(), 5);
        assert_eq!(prompts[0].0, "system");
    }
}

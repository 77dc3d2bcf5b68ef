/// Inline keyboard (buttons) used for callbacks like rule deletion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub buttons: Vec<InlineButton>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub callback_data: String,
}

impl InlineKeyboard {
    /// Convenience for "one button per row" layouts.
    pub fn one_per_row(
        items: impl IntoIterator<Item = (String, String)>,
        max_label_len: usize,
    ) -> Self {
        let buttons = items
            .into_iter()
            .map(|(label, callback_data)| {
                let label = if label.chars().count() > max_label_len {
                    format!("{}...", label.chars().take(max_label_len).collect::<String>())
                } else {
                    label
                };
                InlineButton {
                    label,
                    callback_data,
                }
            })
            .collect();
        Self { buttons }
    }
}

/// Feature flags of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    /// Several photos can be posted as one album.
    pub supports_media_groups: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_labels_are_shortened() {
        let kb = InlineKeyboard::one_per_row(
            vec![
                ("short".to_string(), "a".to_string()),
                ("a very long rule value".to_string(), "b".to_string()),
            ],
            6,
        );
        assert_eq!(kb.buttons[0].label, "short");
        assert_eq!(kb.buttons[1].label, "a very...");
        assert_eq!(kb.buttons[1].callback_data, "b");
    }
}

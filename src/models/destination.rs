#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Channel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub chat_id: i64,
    pub kind: ChatKind,
    pub template: Option<String>,
    pub preview_enabled: bool,
    pub utc_offset_minutes: Option<i32>,
    pub filter_words: Option<Vec<String>>,
}

impl Destination {
    pub fn new(chat_id: i64, kind: ChatKind) -> Self {
        Destination {
            chat_id,
            kind,
            template: None,
            preview_enabled: false,
            utc_offset_minutes: None,
            filter_words: None,
        }
    }
}

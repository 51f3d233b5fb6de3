//! Backend message tags.

/// Every backend message type this crate recognizes.
///
/// A byte that does not map to a variant is a desynchronized stream, not a
/// message to ignore. Recognized messages that a state machine does not
/// expect are rejected by that state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageTag {
    Authentication,
    BackendKeyData,
    BindComplete,
    CloseComplete,
    CommandComplete,
    CopyBothResponse,
    CopyData,
    CopyDone,
    CopyInResponse,
    CopyOutResponse,
    DataRow,
    EmptyQueryResponse,
    ErrorResponse,
    FunctionCallResponse,
    NegotiateProtocolVersion,
    NoData,
    NoticeResponse,
    NotificationResponse,
    ParameterDescription,
    ParameterStatus,
    ParseComplete,
    PortalSuspended,
    ReadyForQuery,
    RowDescription,
}

impl MessageTag {
    /// Map a wire type byte to a tag.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            b'R' => MessageTag::Authentication,
            b'K' => MessageTag::BackendKeyData,
            b'2' => MessageTag::BindComplete,
            b'3' => MessageTag::CloseComplete,
            b'C' => MessageTag::CommandComplete,
            b'W' => MessageTag::CopyBothResponse,
            b'd' => MessageTag::CopyData,
            b'c' => MessageTag::CopyDone,
            b'G' => MessageTag::CopyInResponse,
            b'H' => MessageTag::CopyOutResponse,
            b'D' => MessageTag::DataRow,
            b'I' => MessageTag::EmptyQueryResponse,
            b'E' => MessageTag::ErrorResponse,
            b'V' => MessageTag::FunctionCallResponse,
            b'v' => MessageTag::NegotiateProtocolVersion,
            b'n' => MessageTag::NoData,
            b'N' => MessageTag::NoticeResponse,
            b'A' => MessageTag::NotificationResponse,
            b't' => MessageTag::ParameterDescription,
            b'S' => MessageTag::ParameterStatus,
            b'1' => MessageTag::ParseComplete,
            b's' => MessageTag::PortalSuspended,
            b'Z' => MessageTag::ReadyForQuery,
            b'T' => MessageTag::RowDescription,
            _ => return None,
        })
    }

    /// Wire type byte.
    pub fn as_byte(self) -> u8 {
        match self {
            MessageTag::Authentication => b'R',
            MessageTag::BackendKeyData => b'K',
            MessageTag::BindComplete => b'2',
            MessageTag::CloseComplete => b'3',
            MessageTag::CommandComplete => b'C',
            MessageTag::CopyBothResponse => b'W',
            MessageTag::CopyData => b'd',
            MessageTag::CopyDone => b'c',
            MessageTag::CopyInResponse => b'G',
            MessageTag::CopyOutResponse => b'H',
            MessageTag::DataRow => b'D',
            MessageTag::EmptyQueryResponse => b'I',
            MessageTag::ErrorResponse => b'E',
            MessageTag::FunctionCallResponse => b'V',
            MessageTag::NegotiateProtocolVersion => b'v',
            MessageTag::NoData => b'n',
            MessageTag::NoticeResponse => b'N',
            MessageTag::NotificationResponse => b'A',
            MessageTag::ParameterDescription => b't',
            MessageTag::ParameterStatus => b'S',
            MessageTag::ParseComplete => b'1',
            MessageTag::PortalSuspended => b's',
            MessageTag::ReadyForQuery => b'Z',
            MessageTag::RowDescription => b'T',
        }
    }

    /// Messages the server may send at any time, outside any request cycle.
    pub fn is_async(self) -> bool {
        matches!(
            self,
            MessageTag::NoticeResponse
                | MessageTag::NotificationResponse
                | MessageTag::ParameterStatus
        )
    }
}

impl std::fmt::Display for MessageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}('{}')", self.as_byte() as char)
    }
}

use crate::message::OutboundMessage;

/// Split messages into consecutive batches of at most `batch_size` messages.
pub fn split_batches(messages: &[OutboundMessage], batch_size: usize) -> Vec<&[OutboundMessage]> {
    messages.chunks(batch_size.max(1)).collect()
}

#![no_main]

use libfuzzer_sys::fuzz_target;
use puente_session::{parse_sidecar_frame, SidecarInboundFrame};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let Ok(frame) = parse_sidecar_frame(&raw) else {
        return;
    };
    match &frame {
        SidecarInboundFrame::SendResult { request_id, .. }
        | SidecarInboundFrame::MediaResult { request_id, .. } => {
            let _ = request_id.len();
        }
        SidecarInboundFrame::MessagesUpsert { messages } => {
            for message in messages {
                let _ = message.sender_jid();
                if let Some(content) = message.message.as_ref() {
                    let _ = content.text_body();
                }
            }
        }
        SidecarInboundFrame::ConnectionUpdate(update) => {
            let _ = update.disconnect_status_code();
        }
        SidecarInboundFrame::CredsUpdate { .. } => {}
    }
});

//! SSE 帧格式
//!
//! 每个事件一帧 `data: {json}\n\n`；运行结束后（无论成败）总是再发送 DONE_FRAME。

use crate::react::AgentEvent;

/// 运行结束标记
pub const DONE_FRAME: &str = "event: done\ndata: {}\n\n";

pub fn sse_frame(event: &AgentEvent) -> String {
    match serde_json::to_string(event) {
        Ok(json) => format!("data: {}\n\n", json),
        Err(e) => {
            tracing::error!(error = %e, kind = event.kind(), "failed to serialize event");
            format!(
                "data: {}\n\n",
                serde_json::json!({"type": "error", "data": {"error": e.to_string(), "partial": true}})
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_frame_shape() {
        let event = AgentEvent::StepStart {
            step: 2,
            tool: "echo".into(),
        };
        let frame = sse_frame(&event);
        assert_eq!(frame, "data: {\"type\":\"step_start\",\"data\":{\"step\":2,\"tool\":\"echo\"}}\n\n");
    }

    #[test]
    fn test_frames_decode() {
        let error = AgentEvent::Error {
            error: "boom".into(),
            step: None,
            partial: true,
        };
        let stream = format!("{}{}", sse_frame(&error), DONE_FRAME);
        let frames: Vec<&str> = stream.split_terminator("\n\n").collect();
        assert_eq!(frames.len(), 2);

        let data = frames[0].strip_prefix("data: ").unwrap();
        let v: serde_json::Value = serde_json::from_str(data).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["data"]["partial"], true);
        assert!(v["data"].get("step").is_none());
        assert_eq!(frames[1], "event: done\ndata: {}");
    }
}

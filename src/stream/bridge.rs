use crate::config::RepairConfig;
use crate::translate::{UserContext, map_stop_reason, repair_args};
use crate::translate::{fresh_message_id, fresh_tool_use_id};
use gravitas_schema::anthropic::{
    ContentBlock, ContentBlockDelta, MessageDelta, MessageStartBody, MessagesResponse, StreamEvent,
    Usage,
};
use gravitas_schema::antigravity::GenerateContentResponse;
use serde_json::Value;
use std::collections::HashMap;

/// Kind of the currently open content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text,
    Thinking,
}

/// Per-request state machine translating upstream deltas into the
/// Anthropic event grammar:
///
/// `message_start (content_block_start delta* content_block_stop)*
/// message_delta message_stop`
///
/// The bridge is pure: it consumes parsed upstream frames and returns the
/// events to emit, so the whole grammar is testable without IO. The
/// driving task owns the network reads, timeouts and the outbound
/// channel.
pub struct StreamBridge {
    alias: String,
    tool_schemas: HashMap<String, Value>,
    user: UserContext,
    repair: RepairConfig,

    started: bool,
    finished: bool,
    open: Option<OpenBlock>,
    next_index: usize,
    saw_tool_use: bool,
    finish_reason: Option<String>,
    usage: Usage,
}

impl StreamBridge {
    pub fn new(
        alias: impl Into<String>,
        tool_schemas: HashMap<String, Value>,
        user: UserContext,
        repair: RepairConfig,
    ) -> Self {
        Self {
            alias: alias.into(),
            tool_schemas,
            user,
            repair,
            started: false,
            finished: false,
            open: None,
            next_index: 0,
            saw_tool_use: false,
            finish_reason: None,
            usage: Usage::default(),
        }
    }

    /// `message_start` plus the ping clients expect before the first delta.
    pub fn start_events(&mut self) -> Vec<StreamEvent> {
        debug_assert!(!self.started);
        self.started = true;
        vec![
            StreamEvent::MessageStart {
                message: MessageStartBody::new(fresh_message_id(), self.alias.clone()),
            },
            StreamEvent::Ping,
        ]
    }

    /// True once a terminal `finishReason` has been consumed.
    pub fn saw_finish(&self) -> bool {
        self.finish_reason.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Translate one upstream delta frame.
    pub fn on_delta(&mut self, frame: &GenerateContentResponse) -> Vec<StreamEvent> {
        let body = frame.unwrapped();
        let mut events = Vec::new();

        if let Some(meta) = body.usage_metadata {
            if let Some(input) = meta.prompt_token_count {
                self.usage.input_tokens = input;
            }
            if let Some(output) = meta.candidates_token_count {
                self.usage.output_tokens = output;
            }
        }

        let Some(candidate) = body.candidates.first() else {
            return events;
        };

        for part in candidate
            .content
            .as_ref()
            .map(|c| c.parts.as_slice())
            .unwrap_or_default()
        {
            if part.is_thought_text() {
                let thinking = part.text.clone().unwrap_or_default();
                if thinking.is_empty() {
                    continue;
                }
                self.ensure_block(OpenBlock::Thinking, &mut events);
                events.push(StreamEvent::ContentBlockDelta {
                    index: self.next_index - 1,
                    delta: ContentBlockDelta::ThinkingDelta { thinking },
                });
            } else if let Some(text) = &part.text {
                if text.is_empty() {
                    continue;
                }
                self.ensure_block(OpenBlock::Text, &mut events);
                events.push(StreamEvent::ContentBlockDelta {
                    index: self.next_index - 1,
                    delta: ContentBlockDelta::TextDelta { text: text.clone() },
                });
            } else if let Some(call) = &part.function_call {
                if !self.tool_schemas.is_empty() && !self.tool_schemas.contains_key(&call.name) {
                    continue;
                }
                self.saw_tool_use = true;
                self.close_open_block(&mut events);

                let args = repair_args(
                    call,
                    self.tool_schemas.get(&call.name),
                    &self.user,
                    &self.repair,
                );
                let index = self.next_index;
                self.next_index += 1;
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlock::ToolUse {
                        id: call
                            .id
                            .clone()
                            .filter(|id| !id.is_empty())
                            .unwrap_or_else(fresh_tool_use_id),
                        name: call.name.clone(),
                        input: Value::Object(Default::default()),
                    },
                });
                // The arguments travel exclusively as serialized JSON text;
                // collapsing them into the start block breaks downstream
                // parsers.
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentBlockDelta::InputJsonDelta {
                        partial_json: Value::Object(args).to_string(),
                    },
                });
                events.push(StreamEvent::ContentBlockStop { index });
            }
        }

        if let Some(reason) = &candidate.finish_reason {
            self.finish_reason = Some(reason.clone());
        }

        events
    }

    /// Close any open block and terminate the stream normally.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = Vec::new();
        self.close_open_block(&mut events);
        events.push(StreamEvent::MessageDelta {
            delta: MessageDelta {
                stop_reason: Some(
                    map_stop_reason(self.finish_reason.as_deref(), self.saw_tool_use).to_string(),
                ),
                stop_sequence: None,
            },
            usage: self.usage,
        });
        events.push(StreamEvent::MessageStop);
        events
    }

    /// Terminate after a mid-stream failure. The stream is committed once
    /// `message_start` went out, so the error is in-band: a `message_delta`
    /// carrying `stop_reason:"error"`, then `message_stop`. Never leaves a
    /// stream without a `message_stop`.
    pub fn fail(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = Vec::new();
        self.close_open_block(&mut events);
        events.push(StreamEvent::MessageDelta {
            delta: MessageDelta {
                stop_reason: Some("error".to_string()),
                stop_sequence: None,
            },
            usage: self.usage,
        });
        events.push(StreamEvent::MessageStop);
        events
    }

    fn ensure_block(&mut self, kind: OpenBlock, events: &mut Vec<StreamEvent>) {
        if self.open == Some(kind) {
            return;
        }
        self.close_open_block(events);

        let index = self.next_index;
        self.next_index += 1;
        self.open = Some(kind);
        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block: match kind {
                OpenBlock::Text => ContentBlock::Text {
                    text: String::new(),
                },
                OpenBlock::Thinking => ContentBlock::Thinking {
                    thinking: String::new(),
                    signature: None,
                },
            },
        });
    }

    fn close_open_block(&mut self, events: &mut Vec<StreamEvent>) {
        if self.open.take().is_some() {
            events.push(StreamEvent::ContentBlockStop {
                index: self.next_index - 1,
            });
        }
    }
}

/// Replay a buffered message as a conformant event sequence. Used when
/// streaming is force-disabled but the client asked for SSE.
pub fn events_from_message(message: &MessagesResponse) -> Vec<StreamEvent> {
    let mut events = vec![
        StreamEvent::MessageStart {
            message: MessageStartBody::new(message.id.clone(), message.model.clone()),
        },
        StreamEvent::Ping,
    ];

    let mut index = 0usize;
    for block in &message.content {
        match block {
            ContentBlock::Text { text } => {
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlock::Text {
                        text: String::new(),
                    },
                });
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentBlockDelta::TextDelta { text: text.clone() },
                });
            }
            ContentBlock::Thinking { thinking, .. } => {
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlock::Thinking {
                        thinking: String::new(),
                        signature: None,
                    },
                });
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentBlockDelta::ThinkingDelta {
                        thinking: thinking.clone(),
                    },
                });
            }
            ContentBlock::ToolUse { id, name, input } => {
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: Value::Object(Default::default()),
                    },
                });
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentBlockDelta::InputJsonDelta {
                        partial_json: input.to_string(),
                    },
                });
            }
            _ => continue,
        }
        events.push(StreamEvent::ContentBlockStop { index });
        index += 1;
    }

    events.push(StreamEvent::MessageDelta {
        delta: MessageDelta {
            stop_reason: message.stop_reason.clone(),
            stop_sequence: None,
        },
        usage: message.usage,
    });
    events.push(StreamEvent::MessageStop);
    events
}

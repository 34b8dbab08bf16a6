use std::collections::VecDeque;

use domain::{MessageType, WireMessage};

pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// 断线期间的发送缓冲，满了丢最旧的一条，心跳不入队
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    items: VecDeque<WireMessage>,
    capacity: usize,
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl OutboundQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// 入队，返回被挤掉的最旧消息
    pub fn push(&mut self, message: WireMessage) -> Option<WireMessage> {
        if message.kind == MessageType::Heartbeat {
            return None;
        }
        let dropped = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(message);
        dropped
    }

    /// 发送失败的消息放回队首
    pub fn requeue_front(&mut self, message: WireMessage) {
        if message.kind == MessageType::Heartbeat {
            return;
        }
        if self.items.len() >= self.capacity {
            self.items.pop_back();
        }
        self.items.push_front(message);
    }

    pub fn drain(&mut self) -> impl Iterator<Item = WireMessage> + '_ {
        self.items.drain(..)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

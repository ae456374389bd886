use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, Level};

use nakack::membership::local_membership::LocalMembership;
use nakack::messaging::message::{Message, MessageBatch, MessageFlags};
use nakack::messaging::node_addr::NodeAddr;
use nakack::messaging::transport::loopback::LoopbackNetwork;
use nakack::nakack::nakack::NakAck;
use nakack::nakack::nakack_config::NakAckConfig;
use nakack::nakack::receiver::Receiver;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_thread_ids(true)
        .try_init()
        .ok();
}

struct PrintingReceiver {
    myself: NodeAddr,
}

#[async_trait]
impl Receiver for PrintingReceiver {
    async fn on_message(&self, msg: Message) {
        info!("{:?} received {:?}: {}", self.myself, msg, String::from_utf8_lossy(&msg.payload));
    }

    async fn on_batch(&self, batch: MessageBatch) {
        info!("{:?} received a batch of {} messages from {:?}", self.myself, batch.len(), batch.sender());
        for msg in batch.into_messages() {
            self.on_message(msg).await;
        }
    }
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    init_logging();

    let network = LoopbackNetwork::new();
    let membership = LocalMembership::new();

    // every 7th frame is lost
    let num_frames = AtomicU64::new(0);
    network.set_filter(Some(Arc::new(move |_: NodeAddr, _: NodeAddr, _: &[u8]| {
        num_frames.fetch_add(1, Ordering::Relaxed) % 7 == 6
    })));

    let mut members = Vec::new();
    for port in 9810..9813 {
        let addr = NodeAddr::localhost(port);
        let nakack = NakAck::new(
            NakAckConfig::new(addr),
            network.transport(addr),
            membership.clone(),
            Arc::new(PrintingReceiver { myself: addr }),
        )?;
        membership.join(addr);
        nakack.connect().await?;
        members.push(nakack);
    }

    for i in 0..10 {
        for member in &members {
            let payload = Bytes::from(format!("message {} from {:?}", i, member.myself()));
            member.send(None, payload, MessageFlags::empty()).await?;
        }
    }

    sleep(Duration::from_secs(2)).await;

    for member in &members {
        info!("{:?}: {:?}", member.myself(), member.stats());
        member.disconnect().await;
    }
    Ok(())
}

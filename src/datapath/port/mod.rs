/*!
 * Ports
 *
 * Producer/consumer ports and the handles through which callers drive the
 * enqueue and dequeue fast paths.
 */

mod dequeue;
mod enqueue;
mod lifecycle;
mod types;

pub use types::{CreditTuning, Port, PortArgs, PortHandle};

mod commands_flow;
mod feed_flow;
mod helpers;

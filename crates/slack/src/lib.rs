//! Slack Integration - Events API connector
//!
//! This crate connects BetweenUs to Slack:
//! - **Events** (`events`) - Events API payload parsing, dispatcher, `app_mention` handler
//! - **Mentions** (`mention`) - Bot-mention stripping, channel references, history hints
//! - **Signatures** (`signature`) - `X-Slack-Signature` verification
//! - **Runner** (`runner`) - Queue-fed event loop, one task per envelope
//! - **Web API** (`web`) - History, users and members for the engine; posting replies
//! - **Block Kit** (`blocks`) - Message builders for interventions and failures
//!
//! # Getting Started
//!
//! 1. Create a Slack app at https://api.slack.com/apps
//! 2. Subscribe to the `app_mention` bot event with the request URL `https://<host>/slack/events`
//! 3. Grant `app_mentions:read`, `channels:history`, `groups:history`, `users:read`,
//!    `channels:read` and `chat:write`
//! 4. Set env vars: `BETWEENUS_SLACK_BOT_TOKEN`, `BETWEENUS_SLACK_SIGNING_SECRET`
//!
//! # Architecture
//!
//! ```text
//! POST /slack/events → verify → queue → EventRunner → EventDispatcher → MentionService
//!                                                                          ↓
//!                              chat.postMessage ← Block Kit ← Mediation Runtime
//! ```
//!
//! # Key Types
//!
//! - `EventRunner` - Event loop with graceful shutdown
//! - `EventDispatcher` - Routes events to handlers
//! - `SlackWebClient` - `ConversationSource` and `MessagePoster` over the Web API
//! - `MentionService` - Trait the server implements to run mediations

pub mod blocks;
pub mod events;
pub mod mention;
pub mod runner;
pub mod signature;
pub mod web;

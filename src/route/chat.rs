use mongodb::Database;
use rocket::futures::{SinkExt, StreamExt};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;
use rocket_ws::{Channel, Message, WebSocket};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing_futures::Instrument;
use uuid::Uuid;

use crate::chat::{user_group, ChatRooms};
use crate::data::chat::db::ChatDbExt;
use crate::data::chat::{
    ChatMessage, IncomingMessage, OutgoingMessage, SearchData, SenderData, SocketError, Thread,
    ThreadResponse,
};
use crate::data::user::db::UserDbExt;
use crate::data::user::UserResponse;
use crate::middleware::paging::PageState;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::{problems, Problem};

async fn thread_response(
    db: &Database,
    thread: &Thread,
    viewer: Uuid,
) -> Result<ThreadResponse, Problem> {
    let other = db.get_user(thread.other(viewer)).await?;
    let messages = db.messages_of(&[thread.id]).await?;
    Ok(ThreadResponse::new(
        thread,
        viewer,
        other.map(UserResponse::from),
        &messages,
    ))
}

/// Threads that a user can access, or 404.
async fn participant_thread(db: &Database, id: Uuid, user: Uuid) -> Result<Thread, Problem> {
    match db.get_thread(id).await? {
        Some(thread) if thread.has_participant(user) => Ok(thread),
        _ => Err(problems::not_found("Thread", id)),
    }
}

/// The caller's conversations
#[utoipa::path(
    responses((status = 200, description = "Threads with their messages", body = Vec<ThreadResponse>)),
    security(("jwt" = []))
)]
#[get("/chat")]
#[tracing::instrument(skip(db))]
pub async fn chat_threads(
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Vec<ThreadResponse>>, Problem> {
    let threads = db.threads_of(auth.user).await?;

    let ids: Vec<Uuid> = threads.iter().map(|it| it.id).collect();
    let others: Vec<Uuid> = threads.iter().map(|it| it.other(auth.user)).collect();

    let messages = db.messages_of(&ids).await?;
    let users = db.get_users(&others).await?;

    let response = threads
        .iter()
        .map(|thread| {
            let other = thread.other(auth.user);
            let thread_messages: Vec<ChatMessage> = messages
                .iter()
                .filter(|it| it.thread == thread.id)
                .cloned()
                .collect();

            ThreadResponse::new(
                thread,
                auth.user,
                users
                    .iter()
                    .find(|it| it.id == other)
                    .map(UserResponse::from),
                &thread_messages,
            )
        })
        .collect();

    Ok(Json(response))
}

/// Find users to talk to
#[utoipa::path(
    request_body = SearchData,
    responses((status = 200, description = "`{}` without a query, otherwise `{\"data\": ...}`", body = Object)),
    security(("jwt" = []))
)]
#[post("/chat/search", format = "json", data = "<search>")]
#[tracing::instrument(skip(db))]
pub async fn chat_search(
    search: Json<SearchData>,
    page: PageState,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Value>, Problem> {
    let query = match search.query() {
        Some(it) => it,
        None => return Ok(Json(json!({}))),
    };

    let users = db.search_users(query, auth.user, page).await?;
    if users.is_empty() {
        return Ok(Json(json!({ "data": "No Users Found..." })));
    }

    let users: Vec<UserResponse> = users.iter().map(UserResponse::from).collect();
    Ok(Json(json!({ "data": users })))
}

/// Open the conversation with a user, creating it when needed
#[utoipa::path(
    responses(
        (status = 200, description = "Thread with its messages", body = ThreadResponse),
        (status = 400, description = "Caller can't talk to themselves", body = Problem),
        (status = 404, description = "User doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/chat/thread/<user_id>")]
#[tracing::instrument(skip(db))]
pub async fn thread_open(
    user_id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<ThreadResponse>, Problem> {
    if user_id == auth.user {
        return Err(Problem::new_untyped(
            Status::BadRequest,
            "Can't start a conversation with yourself.",
        ));
    }
    db.require_user(user_id).await?;

    let (thread, _) = db.get_or_create_thread(auth.user, user_id).await?;
    Ok(Json(thread_response(db, &thread, auth.user).await?))
}

/// Delete a conversation
#[utoipa::path(
    responses(
        (status = 200, description = "ID of the deleted thread", body = String),
        (status = 404, description = "Thread doesn't exist or isn't the caller's", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/chat/thread/<id>")]
#[tracing::instrument(skip(db))]
pub async fn thread_delete(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<String, Problem> {
    let thread = participant_thread(db, id, auth.user).await?;
    db.delete_thread(&thread).await?;
    Ok(thread.id.to_string())
}

/// Mark received messages as read
#[utoipa::path(
    responses(
        (status = 200, description = "Number of messages marked read", body = Object),
        (status = 404, description = "Thread doesn't exist or isn't the caller's", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/chat/thread/<id>/read")]
#[tracing::instrument(skip(db))]
pub async fn thread_read(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Value>, Problem> {
    let thread = participant_thread(db, id, auth.user).await?;
    let marked = db.mark_read(thread.id, auth.user).await?;
    Ok(Json(json!({ "marked": marked })))
}

/// Parses a chat frame. Blank messages give `None`.
fn parse_frame(user: Uuid, text: &str) -> Result<Option<IncomingMessage>, String> {
    let incoming: IncomingMessage =
        serde_json::from_str(text).map_err(|_| "Invalid message format.".to_string())?;

    if incoming.is_blank() {
        return Ok(None);
    }
    if incoming.validate().is_err() {
        return Err(format!(
            "Messages can't be longer than {} characters.",
            crate::data::chat::MAX_MESSAGE_LENGTH
        ));
    }
    if incoming.send_by != user {
        return Err("Sender doesn't match the connected user.".to_string());
    }
    if incoming.send_to == user {
        return Err("Can't send messages to yourself.".to_string());
    }

    Ok(Some(incoming))
}

/// Stores a chat frame and delivers it to both participants' groups.
async fn handle_frame(
    db: &Database,
    rooms: &ChatRooms,
    user: Uuid,
    text: &str,
) -> Result<(), String> {
    let incoming = match parse_frame(user, text)? {
        Some(it) => it,
        None => return Ok(()),
    };

    let storage_error = |e: Problem| {
        tracing::error!("unable to handle chat frame: {}", e);
        "Unable to deliver message.".to_string()
    };

    let thread = db
        .get_thread(incoming.thread_id)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| "Thread doesn't exist.".to_string())?;

    if !thread.has_participant(user) || thread.other(user) != incoming.send_to {
        return Err("Recipient isn't part of the thread.".to_string());
    }

    let sender = db.get_user(user).await.map_err(storage_error)?;
    let sender = sender.ok_or_else(|| "Sender doesn't exist.".to_string())?;
    if db
        .get_user(incoming.send_to)
        .await
        .map_err(storage_error)?
        .is_none()
    {
        return Err("Recipient doesn't exist.".to_string());
    }

    let message = ChatMessage::new(thread.id, user, incoming.message.trim());
    db.store_message(&message).await.map_err(storage_error)?;

    let outgoing = OutgoingMessage {
        message: message.message.clone(),
        send_by: user,
        thread_id: thread.id,
        user_data: SenderData::from(&sender),
    };
    let payload = serde_json::to_string(&outgoing).map_err(|_| "Unable to deliver message.")?;

    rooms.send(&user_group(incoming.send_to), payload.clone()).await;
    rooms.send(&user_group(user), payload).await;

    Ok(())
}

/// Chat socket of the logged in user
#[get("/chat/ws")]
pub fn chat_socket(
    auth: UserRoleToken,
    ws: WebSocket,
    db: &State<Database>,
    rooms: &State<ChatRooms>,
) -> Channel<'static> {
    let db = db.inner().clone();
    let rooms = rooms.inner().clone();
    let user = auth.user;

    ws.channel(move |mut stream| {
        Box::pin(
            async move {
                let group = user_group(user);
                let mut receiver = rooms.join(&group).await;
                tracing::debug!("chat socket connected");

                let result = loop {
                    tokio::select! {
                        incoming = stream.next() => {
                            let message = match incoming {
                                Some(Ok(it)) => it,
                                Some(Err(e)) => break Err(e),
                                None => break Ok(()),
                            };

                            match message {
                                Message::Text(text) => {
                                    if let Err(error) = handle_frame(&db, &rooms, user, &text).await {
                                        tracing::warn!("rejected chat frame: {}", error);
                                        let reply = serde_json::to_string(&SocketError { error })
                                            .unwrap_or_default();
                                        if let Err(e) = stream.send(Message::Text(reply)).await {
                                            break Err(e);
                                        }
                                    }
                                }
                                Message::Close(_) => break Ok(()),
                                _ => {}
                            }
                        }
                        delivered = receiver.recv() => {
                            match delivered {
                                Ok(text) => {
                                    if let Err(e) = stream.send(Message::Text(text)).await {
                                        break Err(e);
                                    }
                                }
                                Err(RecvError::Lagged(skipped)) => {
                                    tracing::warn!("chat socket skipped {} messages", skipped);
                                }
                                Err(RecvError::Closed) => break Ok(()),
                            }
                        }
                    }
                };

                rooms.leave(&group, receiver).await;
                tracing::debug!("chat socket disconnected");
                result
            }
            .instrument(tracing::info_span!("chat_socket", %user)),
        )
    })
}

#[cfg(test)]
mod chat_endpoints {
    use super::*;
    use crate::role::Role;
    use crate::route::testing::{database, live_client, offline_client, remove_users, seed_user};
    use rocket::http::ContentType;
    use tokio::sync::broadcast::error::TryRecvError;

    fn frame(message: &str, send_by: Uuid, send_to: Uuid) -> String {
        json!({
            "message": message,
            "send_by": send_by,
            "send_to": send_to,
            "thread_id": Uuid::new_v4(),
        })
        .to_string()
    }

    #[test]
    fn blank_frames_are_ignored() {
        let user = Uuid::new_v4();
        let parsed = parse_frame(user, &frame("   ", user, Uuid::new_v4()));
        assert!(matches!(parsed, Ok(None)));
    }

    #[test]
    fn frames_must_come_from_connected_user() {
        let user = Uuid::new_v4();
        let parsed = parse_frame(user, &frame("hi", Uuid::new_v4(), Uuid::new_v4()));
        assert_eq!(
            parsed.unwrap_err(),
            "Sender doesn't match the connected user."
        );

        let parsed = parse_frame(user, &frame("hi", user, user));
        assert!(parsed.is_err());

        let to = Uuid::new_v4();
        let parsed = parse_frame(user, &frame("hi", user, to)).expect("valid frame");
        assert_eq!(parsed.map(|it| it.send_to), Some(to));
    }

    #[test]
    fn malformed_frames_are_rejected() {
        let user = Uuid::new_v4();
        assert_eq!(
            parse_frame(user, "not json").unwrap_err(),
            "Invalid message format."
        );
        assert!(parse_frame(user, r#"{"message":"hi"}"#).is_err());

        let long = "x".repeat(crate::data::chat::MAX_MESSAGE_LENGTH + 1);
        assert!(parse_frame(user, &frame(&long, user, Uuid::new_v4())).is_err());
    }

    #[rocket::async_test]
    async fn v1_chat_requires_login() {
        let client = offline_client().await;

        let response = client.get("/api/v1/chat").dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);

        let response = client
            .post("/api/v1/chat/search")
            .header(ContentType::JSON)
            .body(r#"{"users":"anna"}"#)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);

        let response = client.get("/api/v1/chat/ws").dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn rejected_frames_reach_nobody() {
        let client = offline_client().await;
        let rooms = ChatRooms::new(8);
        let (user, other) = (Uuid::new_v4(), Uuid::new_v4());
        let mut inbox = rooms.join(&user_group(other)).await;

        let result = handle_frame(
            database(&client),
            &rooms,
            user,
            &frame("hi", Uuid::new_v4(), other),
        )
        .await;
        assert_eq!(
            result.unwrap_err(),
            "Sender doesn't match the connected user."
        );
        assert!(matches!(inbox.try_recv(), Err(TryRecvError::Empty)));
    }

    #[rocket::async_test]
    #[ignore = "requires a running MongoDB instance"]
    async fn frames_are_stored_and_sent_to_both_participants() {
        let client = live_client().await;
        let db = database(&client);
        let rooms = ChatRooms::new(8);
        let (anna, _) = seed_user(&client, "anna", Role::Student).await;
        let (olek, _) = seed_user(&client, "olek", Role::Teacher).await;
        let (thread, _) = db
            .get_or_create_thread(anna.id, olek.id)
            .await
            .expect("thread");

        let mut anna_inbox = rooms.join(&user_group(anna.id)).await;
        let mut olek_inbox = rooms.join(&user_group(olek.id)).await;

        let text = json!({
            "message": "  Is it due today?  ",
            "send_by": anna.id,
            "send_to": olek.id,
            "thread_id": thread.id,
        })
        .to_string();
        handle_frame(db, &rooms, anna.id, &text)
            .await
            .expect("frame handled");

        let expected = OutgoingMessage {
            message: "Is it due today?".to_string(),
            send_by: anna.id,
            thread_id: thread.id,
            user_data: SenderData::from(&anna),
        };
        for inbox in [&mut anna_inbox, &mut olek_inbox] {
            let payload = inbox.try_recv().expect("delivered frame");
            let delivered: OutgoingMessage =
                serde_json::from_str(&payload).expect("outgoing json");
            assert_eq!(delivered, expected);
        }

        let stored = db.messages_of(&[thread.id]).await.expect("messages");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].message, "Is it due today?");
        assert_eq!(stored[0].user, anna.id);

        remove_users(&client, &[&anna, &olek]).await;
    }

    #[rocket::async_test]
    #[ignore = "requires a running MongoDB instance"]
    async fn v1_thread_open_reuses_thread() {
        let client = live_client().await;
        let (anna, anna_cookie) = seed_user(&client, "anna", Role::Student).await;
        let (olek, olek_cookie) = seed_user(&client, "olek", Role::Student).await;

        let mut opened = Vec::new();
        for (cookie, other) in [
            (&anna_cookie, olek.id),
            (&anna_cookie, olek.id),
            (&olek_cookie, anna.id),
        ] {
            let response = client
                .post(format!("/api/v1/chat/thread/{}", other))
                .cookie(cookie.clone())
                .dispatch()
                .await;
            assert_eq!(response.status(), Status::Ok);
            let thread: ThreadResponse = response.into_json().await.expect("thread json");
            opened.push(thread);
        }

        assert!(opened.iter().all(|it| it.id == opened[0].id));
        assert_eq!(opened[0].first_person, anna.id, "creator should come first");

        let (_, created) = database(&client)
            .get_or_create_thread(olek.id, anna.id)
            .await
            .expect("thread");
        assert!(!created);

        remove_users(&client, &[&anna, &olek]).await;
    }
}

mod common;

use anyhow::Result;
use common::{Household, assert_kind, recording_service, test_service};
use splitledger::application::ErrorKind;
use splitledger::domain::FriendEvent;

#[tokio::test]
async fn test_request_and_accept() -> Result<()> {
    let (service, dispatcher, _temp) = recording_service().await?;
    let home = Household::create(&service).await?;

    let request = service
        .send_friend_request(home.bob.id, home.alice.id)
        .await?;
    assert_eq!(request.sender_id, home.bob.id);
    assert_eq!(request.receiver_id, home.alice.id);

    let sent = dispatcher.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "chat-alice");
    let alert = sent[0].1.as_friend().expect("friend alert");
    assert_eq!(alert.event, FriendEvent::Requested);
    assert_eq!(alert.from_user_id, home.bob.id);
    assert_eq!(alert.text, "Bob sent you a friend request");

    let incoming = service.list_friend_requests(home.alice.id).await?;
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].sender_id, home.bob.id);
    assert!(service.list_friend_requests(home.bob.id).await?.is_empty());

    // Only the receiver can answer
    assert_kind(
        service
            .accept_friend_request(home.bob.id, home.alice.id)
            .await,
        ErrorKind::NotFound,
    );

    service
        .accept_friend_request(home.alice.id, home.bob.id)
        .await?;

    let alices = service.list_friends(home.alice.id).await?;
    assert_eq!(alices.len(), 1);
    assert_eq!(alices[0].id, home.bob.id);
    let bobs = service.list_friends(home.bob.id).await?;
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs[0].id, home.alice.id);
    assert!(service.list_friend_requests(home.alice.id).await?.is_empty());

    // Bob has no messaging address, so the answer goes nowhere
    assert_eq!(dispatcher.sent().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_answer_is_pushed_to_sender() -> Result<()> {
    let (service, dispatcher, _temp) = recording_service().await?;
    let home = Household::create(&service).await?;

    service
        .send_friend_request(home.alice.id, home.carol.id)
        .await?;
    service
        .accept_friend_request(home.carol.id, home.alice.id)
        .await?;

    let sent = dispatcher.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "chat-alice");
    let alert = sent[0].1.as_friend().expect("friend alert");
    assert_eq!(alert.event, FriendEvent::Accepted);
    assert_eq!(alert.from_user_id, home.carol.id);
    assert_eq!(alert.text, "Carol accepted your friend request");

    Ok(())
}

#[tokio::test]
async fn test_decline_leaves_no_friendship() -> Result<()> {
    let (service, dispatcher, _temp) = recording_service().await?;
    let home = Household::create(&service).await?;

    service
        .send_friend_request(home.alice.id, home.carol.id)
        .await?;
    service
        .decline_friend_request(home.carol.id, home.alice.id)
        .await?;

    assert!(service.list_friends(home.alice.id).await?.is_empty());
    assert!(service.list_friends(home.carol.id).await?.is_empty());
    assert!(service.list_friend_requests(home.carol.id).await?.is_empty());

    let sent = dispatcher.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].1.text(),
        "Carol declined your friend request"
    );

    // Answering twice finds nothing
    assert_kind(
        service
            .decline_friend_request(home.carol.id, home.alice.id)
            .await,
        ErrorKind::NotFound,
    );

    // A declined request can be sent again, from either side
    service
        .send_friend_request(home.carol.id, home.alice.id)
        .await?;

    Ok(())
}

#[tokio::test]
async fn test_request_conflicts() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service).await?;

    assert_kind(
        service
            .send_friend_request(home.bob.id, home.bob.id)
            .await,
        ErrorKind::Validation,
    );
    assert_kind(
        service.send_friend_request(home.bob.id, 999).await,
        ErrorKind::NotFound,
    );

    service
        .send_friend_request(home.bob.id, home.carol.id)
        .await?;
    assert_kind(
        service
            .send_friend_request(home.bob.id, home.carol.id)
            .await,
        ErrorKind::Conflict,
    );
    // The other direction is already pending too
    assert_kind(
        service
            .send_friend_request(home.carol.id, home.bob.id)
            .await,
        ErrorKind::Conflict,
    );

    service
        .accept_friend_request(home.carol.id, home.bob.id)
        .await?;
    assert_kind(
        service
            .send_friend_request(home.carol.id, home.bob.id)
            .await,
        ErrorKind::Conflict,
    );

    Ok(())
}

#[tokio::test]
async fn test_remove_friend() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service).await?;

    service
        .send_friend_request(home.bob.id, home.carol.id)
        .await?;
    service
        .accept_friend_request(home.carol.id, home.bob.id)
        .await?;

    service.remove_friend(home.carol.id, home.bob.id).await?;
    assert!(service.list_friends(home.bob.id).await?.is_empty());
    assert!(service.list_friends(home.carol.id).await?.is_empty());

    assert_kind(
        service.remove_friend(home.bob.id, home.carol.id).await,
        ErrorKind::NotFound,
    );

    Ok(())
}

#[tokio::test]
async fn test_deleted_user_drops_out_of_friend_list() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service).await?;

    for friend in [&home.alice, &home.carol] {
        service.send_friend_request(home.bob.id, friend.id).await?;
        service.accept_friend_request(friend.id, home.bob.id).await?;
    }
    assert_eq!(service.list_friends(home.bob.id).await?.len(), 2);

    service.delete_user(home.carol.id).await?;

    let friends = service.list_friends(home.bob.id).await?;
    assert_eq!(friends.len(), 1);
    assert_eq!(friends[0].id, home.alice.id);

    Ok(())
}

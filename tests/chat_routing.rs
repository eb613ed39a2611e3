mod common;

use common::Harness;

#[tokio::test]
async fn say_reaches_the_room_only() {
    let mut h = Harness::new();
    let mut ada = h.login("Ada").await;
    let mut bob = h.login("Bob").await;
    let mut cid = h.login("Cid").await;
    h.send(&cid, "north");
    ada.drain();
    bob.drain();
    cid.drain();

    h.send(&ada, "say hello there");
    assert!(ada.saw("You say, \"hello there\""));
    assert!(bob.saw("Ada says, \"hello there\""));
    assert!(cid.drain().is_empty());

    h.send(&ada, "shout anyone up top?");
    assert!(cid.saw("Ada shouts, \"anyone up top?\""));
}

#[tokio::test]
async fn ignored_speaker_is_silent_for_that_listener() {
    let mut h = Harness::new();
    let mut ada = h.login("Ada").await;
    let mut bob = h.login("Bob").await;
    let mut cid = h.login("Cid").await;
    h.send(&bob, "ignore ada");
    assert!(bob.saw("You are now ignoring ada"));
    ada.drain();
    cid.drain();

    h.send(&ada, "say can anyone hear me");
    assert!(bob.drain().is_empty());
    assert!(cid.saw("Ada says"));

    // the sender cannot tell a tell was swallowed
    h.send(&ada, "tell bob psst");
    assert!(ada.saw("You tell Bob, \"psst\""));
    assert!(bob.drain().is_empty());

    h.send(&bob, "unignore Ada");
    bob.drain();
    h.send(&ada, "tell bob again");
    assert!(bob.saw("Ada tells you, \"again\""));
}

#[tokio::test]
async fn sixth_message_in_window_is_dropped() {
    let mut h = Harness::new();
    let mut ada = h.login("Ada").await;
    let mut bob = h.login("Bob").await;
    ada.drain();
    bob.drain();

    for n in 1..=6 {
        h.send(&ada, &format!("say message {}", n));
        h.clock.advance_millis(500);
    }
    let heard: Vec<String> = bob
        .drain()
        .into_iter()
        .filter(|l| l.starts_with("Ada says"))
        .collect();
    assert_eq!(heard.len(), 5);
    assert!(!heard.iter().any(|l| l.contains("message 6")));
    assert!(ada.saw("talking too fast"));

    // the window slides
    h.clock.advance_secs(10);
    h.send(&ada, "say back again");
    assert!(bob.saw("Ada says, \"back again\""));
}

#[tokio::test]
async fn repeats_and_banned_words_are_handled() {
    let mut h = Harness::new();
    let mut ada = h.login("Ada").await;
    let mut bob = h.login("Bob").await;
    ada.drain();
    bob.drain();

    h.send(&ada, "say darn stairs");
    assert!(bob.saw("Ada says, \"**** stairs\""));
    h.send(&ada, "say darn stairs");
    assert!(ada.saw("You just said that."));
    assert!(bob.drain().is_empty());
}

#[tokio::test]
async fn tell_to_someone_offline_fails() {
    let mut h = Harness::new();
    let mut ada = h.login("Ada").await;
    ada.drain();
    h.send(&ada, "tell zed hello");
    assert!(ada.saw("You don't see anyone called zed online here."));
}

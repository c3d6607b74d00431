//! Core Flow Integration Tests
//!
//! Tweet → fan-out → feed read across account-service and feed-service,
//! wired in-process.
//!
//! Run: cargo test --test core_flow_test

mod test_harness;

use account_service::UserChanges;
use feed_service::models::FanoutStatus;
use std::collections::HashSet;
use test_harness::TestEnvironment;

#[tokio::test]
async fn test_tweets_reach_current_followers_only() {
    let env = TestEnvironment::new();
    let a = env.user("linghu").await;
    let b = env.user("dongxie").await;
    let c = env.user("xidu").await;
    let d = env.user("nandi").await;
    let e = env.user("beigai").await;
    for follower in [&b, &c, &d] {
        env.follow(follower, &a).await;
    }

    let t1 = env.post(&a, "first tweet from linghu").await;
    for owner in [&a, &b, &c, &d] {
        assert_eq!(env.feed_ids(owner).await, vec![t1.id]);
    }
    assert!(env.feed_ids(&e).await.is_empty());

    env.follow(&e, &a).await;
    let t2 = env.post(&a, "second tweet from linghu").await;

    assert_eq!(env.feed_ids(&b).await, vec![t2.id, t1.id]);
    assert_eq!(env.feed_ids(&a).await, vec![t2.id, t1.id]);
    assert_eq!(env.feed_ids(&e).await, vec![t2.id]);

    for tweet in [&t1, &t2] {
        assert_eq!(
            env.jobs.status(tweet.id).map(|job| job.status),
            Some(FanoutStatus::Completed)
        );
    }
    env.cleanup().await;
}

#[tokio::test]
async fn test_feed_has_each_tweet_once_in_order() {
    let env = TestEnvironment::new();
    let authors = [env.user("ann").await, env.user("ben").await, env.user("cat").await];
    let reader = env.user("reader").await;
    for author in &authors {
        env.follow(&reader, author).await;
    }
    // ann and ben follow each other too, across batch boundaries
    env.follow(&authors[0], &authors[1]).await;
    env.follow(&authors[1], &authors[0]).await;

    let mut posted = Vec::new();
    for round in 0..4 {
        for author in &authors {
            let tweet = env
                .post(author, &format!("round {} by {}", round, author.username))
                .await;
            posted.push(tweet);
        }
    }
    // Redelivering everything again must not duplicate anything.
    for tweet in &posted {
        env.newsfeed.fanout_to_followers(tweet).await.unwrap();
    }

    let page = env.feed(&reader).await;
    let ids: Vec<_> = page.items.iter().map(|item| item.tweet.id).collect();
    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(ids.len(), posted.len());
    assert_eq!(unique.len(), posted.len());

    let keys: Vec<_> = page
        .items
        .iter()
        .map(|item| (item.tweet.ordering_key(), item.tweet.id))
        .collect();
    assert!(keys.windows(2).all(|w| w[0] > w[1]));

    let ann_feed = env.feed_ids(&authors[0]).await;
    assert_eq!(ann_feed.len(), 8);
    assert!(posted
        .iter()
        .filter(|t| t.author_id == authors[2].id)
        .all(|t| !ann_feed.contains(&t.id)));
    env.cleanup().await;
}

#[tokio::test]
async fn test_renamed_author_shows_new_name_in_feeds() {
    let env = TestEnvironment::new();
    let author = env.user("oldname").await;
    let reader = env.user("reader").await;
    env.follow(&reader, &author).await;
    env.post(&author, "before the rename").await;

    let page = env.feed(&reader).await;
    assert_eq!(page.items[0].author.username, "oldname");

    env.accounts
        .update_user(
            author.id,
            UserChanges {
                username: Some("newname".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    env.settle().await;

    let page = env.feed(&reader).await;
    assert_eq!(page.items[0].author.username, "newname");
    env.cleanup().await;
}

#[tokio::test]
async fn test_renamed_commenter_shows_new_name_under_tweet() {
    let env = TestEnvironment::new();
    let author = env.user("author").await;
    let commenter = env.user("chatty").await;
    let tweet = env.post(&author, "what do you think?").await;

    env.comments
        .create_comment(Some(commenter.id), tweet.id, "first!")
        .await
        .unwrap();
    let listed = env.comments.list_comments(None, tweet.id).await.unwrap();
    assert_eq!(listed[0].author.username, "chatty");

    env.accounts
        .update_user(
            commenter.id,
            UserChanges {
                username: Some("quiet".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    env.settle().await;

    let listed = env.comments.list_comments(None, tweet.id).await.unwrap();
    assert_eq!(listed[0].author.username, "quiet");
    env.cleanup().await;
}

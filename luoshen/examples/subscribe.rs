// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Subscribe to a topic filter and print inbound messages.

use std::time::Duration;

use luoshen::{Client, ConnectOptions, QoS, TopicFilter};

fn main() -> Result<(), luoshen::Error> {
    env_logger::init();

    let options = ConnectOptions::builder("127.0.0.1", 1883)
        .client_id("luoshen-subscribe-example")
        .keep_alive(Duration::from_secs(30))
        .build()?;
    let client = Client::new(options);
    client.start();

    client.connect(true).wait()?;

    let filter = TopicFilter::new("luoshen/#", QoS::AtLeastOnce)?.with_sink(|message| {
        println!(
            "{}: {}",
            message.topic(),
            String::from_utf8_lossy(message.payload())
        );
    });
    let results = client.subscribe_filter(filter).wait()?;
    for result in &results {
        println!("subscribed {} -> {:?}", result.filter, result.granted_qos);
    }

    std::thread::sleep(Duration::from_secs(60));
    client.disconnect().wait()?;
    client.stop();
    Ok(())
}
